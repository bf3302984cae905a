//! zedbox multi-call binary

#[tokio::main]
async fn main() {
    let code = zedbox::run(std::env::args_os()).await;
    std::process::exit(code);
}
