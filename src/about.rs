pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MOTIFLAB_DISPLAY_VERSION: &str = env!("MOTIFLAB_DISPLAY_VERSION");
pub const MOTIFLAB_BUILD_N: &str = env!("MOTIFLAB_BUILD_N");

pub fn version_cli_text() -> String {
    format!(
        "MotifLab {}\nBuild {}\nSession format {}\nWorkbench for regulatory sequence analysis",
        MOTIFLAB_DISPLAY_VERSION,
        MOTIFLAB_BUILD_N,
        motiflab_protocol::SESSION_FORMAT_VERSION
    )
}
