use std::process::Command;

use crate::utils::{check_command_print_stdout, project_root};

pub(crate) fn test(filter: Option<String>) {
    println!("Running cargo test");
    let mut test_cmd = Command::new("cargo");
    test_cmd.current_dir(project_root());
    test_cmd.args(["test", "-p", "keelson_core"]);
    if let Some(filter) = filter {
        test_cmd.arg(filter);
    }
    check_command_print_stdout!(test_cmd, "Failed to run cargo test: {}");
}
