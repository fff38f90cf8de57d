use std::path::{Path, PathBuf};

macro_rules! check_command {
    ($cmd:tt, $msg:tt) => {
        let output = $cmd.output().expect("Failed to spawn command");
        if !output.status.success() {
            eprintln!($msg, format!("\n\n{}", String::from_utf8_lossy(&output.stderr)));
            eprintln!("Try again with command: {:?}", $cmd);
            std::process::exit(1);
        }
    };
}

macro_rules! check_command_print_stdout {
    ($cmd:tt, $msg:tt) => {
        let output = $cmd.output().expect("Failed to spawn command");
        if !output.status.success() {
            eprintln!($msg, format!("\n\n{}", String::from_utf8_lossy(&output.stdout)));
            eprintln!("Try again with command: {:?}", $cmd);
            std::process::exit(1);
        }
    };
}
pub(crate) use check_command;
pub(crate) use check_command_print_stdout;

/// The workspace root, one level above this crate.
pub(crate) fn project_root() -> PathBuf {
    Path::new(&env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(1)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
