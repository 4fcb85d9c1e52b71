fn main() {
    tutor_entitlements_lib::run()
}
