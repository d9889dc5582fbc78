fn main() {
    evt_pipeline::cli::run();
}
