//! Binary entrypoint for the fractal-focus tool

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fractal_focus::cli::run().await
}
