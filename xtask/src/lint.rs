use std::process::Command;

use crate::utils::{check_command, project_root};

pub(crate) fn lint() {
    println!("Running clippy");
    let mut lint_cmd = Command::new("cargo");
    lint_cmd.current_dir(project_root());
    lint_cmd.args([
        "clippy",
        "--color=always",
        "--all-targets",
        "--",
        "-D",
        "warnings",
    ]);
    check_command!(lint_cmd, "Failed to run cargo clippy: {}");
}
