use xshell::{cmd, Shell};

pub(crate) fn clean() {
    let sh = Shell::new().expect("Failed to create shell");
    cmd!(sh, "cargo clean")
        .read()
        .expect("Failed to run cargo clean");
}
