fn main() {
    #[cfg(feature = "cli")]
    cbdpatch::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("cbdpatch: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
