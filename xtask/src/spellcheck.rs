use std::process::Command;

use crate::utils::{check_command_print_stdout, project_root};

pub(crate) fn spellcheck() {
    println!("Running cargo spellcheck");
    let mut spellcheck_cmd = Command::new("cargo");
    spellcheck_cmd.current_dir(project_root());
    spellcheck_cmd.args(["spellcheck", "--code", "1"]);
    check_command_print_stdout!(spellcheck_cmd, "Failed to run cargo spellcheck: {}");
}
