#![no_main]
use cbdpatch::format::PatchHeader;
use cbdpatch::{ApplyOptions, apply_memory};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let split = usize::from(data[0]).min(data.len() - 1);
    let (source, patch) = data[1..].split_at(split);

    // Header-framed input as given: the declared length caps the output.
    let _ = apply_memory(patch, Some(source), ApplyOptions::default());

    // Fold wide operand classes so unbounded raw streams stay small.
    let folded: Vec<u8> = patch
        .iter()
        .map(|&b| if b >= 248 { b - 8 } else { b })
        .collect();
    let raw = ApplyOptions {
        patch_has_header: false,
        ..ApplyOptions::default()
    };
    let _ = apply_memory(&folded, Some(source), raw);
    let _ = apply_memory(&folded, None, raw);

    // Same stream under a valid header, so the engine runs with a limit.
    let mut h = PatchHeader::default();
    h.dst_length = 1 << 16;
    h.instruction_crc32 = crc32fast::hash(patch);
    let mut framed = h.to_bytes().to_vec();
    framed.extend_from_slice(patch);
    let _ = apply_memory(&framed, None, ApplyOptions::default());
});
