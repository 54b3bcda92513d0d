fn main() {
    utrack_loader::cli::run();
}
