fn main() {
    // Propagates the ESP-IDF linker and cfg settings; does nothing on host builds
    embuild::espidf::sysenv::output();
}
