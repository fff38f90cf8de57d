use std::process::Command;

use crate::utils::{check_command_print_stdout, project_root};

pub(crate) fn format(check: bool) {
    println!("Running cargo fmt");
    let mut fmt_cmd = Command::new("cargo");
    fmt_cmd.current_dir(project_root());
    fmt_cmd.arg("fmt");
    if check {
        fmt_cmd.arg("--check");
    }
    check_command_print_stdout!(fmt_cmd, "Failed to run cargo fmt: {}");
}
