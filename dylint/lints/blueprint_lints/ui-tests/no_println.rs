// Test case for NO_PRINTLN lint

fn bad_println() {
    println!("route compiled");
}

fn bad_eprintln() {
    eprintln!("policy rejected request");
}

fn bad_dbg() {
    let x = 42;
    dbg!(x);
}

// Good: using tracing
fn good_tracing() {
    tracing::debug!(path = "/users", "route compiled");
}

fn main() {
    bad_println();
    bad_eprintln();
    bad_dbg();
    good_tracing();
}
