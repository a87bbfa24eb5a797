#![forbid(unsafe_code)]

use clap::Parser;

/// Launch a target application and monitor its file usage.
///
/// The launcher takes no flags of its own: everything after the target
/// executable is passed through verbatim.
#[derive(Debug, Parser, Clone)]
#[command(name = "launcher", about, version)]
pub struct Cli {
    /// Target executable to launch and observe.
    pub target: String,

    /// Arguments passed through to the target.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl Cli {
    /// Full argv for the target process.
    pub fn target_argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(1 + self.args.len());
        argv.push(self.target.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }
}
