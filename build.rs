fn main() {
    // Only firmware builds need the ESP-IDF environment; host builds (tests,
    // the simulated device) have nothing to forward.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
