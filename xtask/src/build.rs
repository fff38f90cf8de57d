use std::process::Command;

use crate::utils::check_command;

pub(crate) fn build(release: bool) {
    //TODO: Make colors auto detected so CI logs stay readable
    println!("Building keelson");
    let mut build_cmd = Command::new("cargo");
    build_cmd.args(["build", "--color=always", "-p", "keelson_core"]);
    if release {
        build_cmd.arg("--release");
    }
    check_command!(build_cmd, "Failed to build keelson: {}");
}
