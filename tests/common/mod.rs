// Test-only patch writer.
//
// `PatchBuilder` emits instruction bytes with the crate's own encoding
// helpers and tracks the output the stream should produce, so tests can
// compare an application against an independently built expectation.

#![allow(dead_code)]

use std::collections::HashMap;

use cbdpatch::format::header::{HeaderFlags, PatchHeader};
use cbdpatch::format::opcode::{OpType, Opcode};
use cbdpatch::format::varint::{self, WidthClass};

enum Last {
    None,
    Fill(u8),
    Block(Vec<u8>),
}

pub struct PatchBuilder<'s> {
    source: Option<&'s [u8]>,
    body: Vec<u8>,
    target: Vec<u8>,
    last: Last,
    ops: u32,
}

impl<'s> PatchBuilder<'s> {
    pub fn new(source: Option<&'s [u8]>) -> Self {
        Self {
            source,
            body: Vec::new(),
            target: Vec::new(),
            last: Last::None,
            ops: 0,
        }
    }

    fn op(&mut self, op: OpType, param: u64) {
        let class = WidthClass::for_magnitude(param);
        let byte = Opcode::Op { op, class }.to_byte().unwrap();
        self.body.push(byte);
        varint::encode(param, class, &mut self.body).unwrap();
        self.ops += 1;
    }

    fn offset(&mut self, value: u64, class: WidthClass) {
        varint::encode(value, class, &mut self.body).unwrap();
    }

    /// Instant literals; every byte must be below 240.
    pub fn literals(&mut self, bytes: &[u8]) -> &mut Self {
        assert!(bytes.iter().all(|&b| b < 240), "literal byte out of range");
        if let Some(&last) = bytes.last() {
            self.body.extend_from_slice(bytes);
            self.target.extend_from_slice(bytes);
            self.last = Last::Fill(last);
        }
        self
    }

    pub fn data(&mut self, bytes: &[u8]) -> &mut Self {
        assert!(!bytes.is_empty());
        self.op(OpType::Data, bytes.len() as u64 - 1);
        self.body.extend_from_slice(bytes);
        self.target.extend_from_slice(bytes);
        self.last = Last::Block(bytes.to_vec());
        self
    }

    pub fn source(&mut self, offset: u64, len: u64) -> &mut Self {
        assert!(len >= 7);
        let src = self.source.expect("source copy without a source");
        self.op(OpType::Source, len - 7);
        self.offset(offset, WidthClass::for_magnitude(src.len() as u64));
        let block = src[offset as usize..(offset + len) as usize].to_vec();
        self.target.extend_from_slice(&block);
        self.last = Last::Block(block);
        self
    }

    pub fn dest(&mut self, offset: u64, len: u64) -> &mut Self {
        assert!(len >= 7);
        let width = WidthClass::for_magnitude(self.target.len() as u64);
        self.op(OpType::Dest, len - 7);
        self.offset(offset, width);
        for i in 0..len {
            let b = self.target[(offset + i) as usize];
            self.target.push(b);
        }
        let block = self.target[offset as usize..(offset + len) as usize].to_vec();
        self.last = Last::Block(block);
        self
    }

    pub fn repeat(&mut self, count: u64) -> &mut Self {
        assert!(count >= 1);
        self.op(OpType::Repeat, count - 1);
        match std::mem::replace(&mut self.last, Last::None) {
            Last::None => {}
            Last::Fill(b) => self.target.extend(std::iter::repeat_n(b, count as usize)),
            Last::Block(block) => {
                for _ in 0..count {
                    self.target.extend_from_slice(&block);
                }
            }
        }
        self
    }

    /// Arbitrary bytes; the expected output is not updated.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.body.extend_from_slice(bytes);
        self
    }

    pub fn target(&self) -> &[u8] {
        &self.target
    }

    pub fn finish_raw(&self) -> Vec<u8> {
        self.body.clone()
    }

    /// Header describing this builder's source, body and expected output.
    pub fn header(&self) -> PatchHeader {
        let mut h = PatchHeader::default();
        if let Some(src) = self.source {
            h.flags |= HeaderFlags::HAS_SOURCE;
            h.src_length = src.len() as u32;
            h.src_crc32 = crc32fast::hash(src);
        }
        h.dst_length = self.target.len() as u32;
        h.dst_crc32 = crc32fast::hash(&self.target);
        h.instruction_count = self.ops;
        h.instruction_crc32 = crc32fast::hash(&self.body);
        h
    }

    pub fn finish_with_header(&self) -> Vec<u8> {
        self.finish_with(|_| {})
    }

    /// Header plus body, after `edit` adjusts the header fields.
    pub fn finish_with(&self, edit: impl FnOnce(&mut PatchHeader)) -> Vec<u8> {
        let mut h = self.header();
        edit(&mut h);
        let mut patch = h.to_bytes().to_vec();
        patch.extend_from_slice(&self.body);
        patch
    }
}

const SEED: usize = 7;

/// Greedy differ: source matches, runs, and single bytes otherwise.
///
/// Large sources are indexed at a stride, so matches start only at
/// multiples of it.
pub fn naive_patch<'s>(source: &'s [u8], target: &[u8]) -> PatchBuilder<'s> {
    let stride = (source.len() / 65_536).max(1);
    let mut seeds: HashMap<&[u8], Vec<usize>> = HashMap::new();
    if source.len() >= SEED {
        for i in (0..=source.len() - SEED).step_by(stride) {
            let v = seeds.entry(&source[i..i + SEED]).or_default();
            if v.len() < 8 {
                v.push(i);
            }
        }
    }

    let mut b = PatchBuilder::new(Some(source));
    let mut i = 0;
    while i < target.len() {
        let byte = target[i];
        let run = target[i..].iter().take_while(|&&x| x == byte).count();

        if i > 0 && run >= SEED && target[i - 1] == byte {
            b.dest(i as u64 - 1, run as u64);
            i += run;
            continue;
        }
        if run >= 4 {
            if byte < 240 {
                b.literals(&[byte]);
            } else {
                b.data(&[byte]);
            }
            b.repeat(run as u64 - 1);
            i += run;
            continue;
        }

        let best = target
            .get(i..i + SEED)
            .and_then(|key| seeds.get(key))
            .into_iter()
            .flatten()
            .map(|&start| {
                let len = source[start..]
                    .iter()
                    .zip(&target[i..])
                    .take_while(|(a, b)| a == b)
                    .count();
                (start, len)
            })
            .max_by_key(|&(_, len)| len);
        if let Some((start, len)) = best {
            b.source(start as u64, len as u64);
            i += len;
            continue;
        }

        if byte < 240 {
            b.literals(&[byte]);
        } else {
            b.data(&[byte]);
        }
        i += 1;
    }
    assert_eq!(b.target(), target, "builder model diverged");
    b
}
