mod compile;
mod detect;
mod process;
mod testcase;

pub use compile::CompilerCache;
pub use detect::{DetectorCache, IoDetection, IoMethod, detect, detect_in_source};
pub use process::{ProcessRegistry, RunOutput, StdinSource, run_process};
pub use testcase::run_test_case;
