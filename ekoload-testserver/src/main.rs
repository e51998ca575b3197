use std::net::SocketAddr;

use tokio::net::TcpListener;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mut bind_addr: SocketAddr = "127.0.0.1:0".parse()?;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bind" => {
                let addr = args.next().ok_or_else(|| {
                    anyhow::anyhow!("--bind requires an address, e.g. 127.0.0.1:0")
                })?;
                bind_addr = addr.parse()?;
            }
            "-h" | "--help" => {
                eprintln!(
                    "ekoload-testserver\n\nUSAGE:\n  ekoload-testserver [--bind 127.0.0.1:0]\n\nOUTPUT:\n  Prints TARGET_URL=<ws url> and TARGET_TOKEN_URL=<http url> to stdout once ready."
                );
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("unknown argument: {other}"));
            }
        }
    }

    let listener = TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    let stats = ekoload_testserver::TestServerStats::default();
    let app = ekoload_testserver::router(stats);

    println!("TARGET_URL=ws://{addr}");
    println!(
        "TARGET_TOKEN_URL=http://{addr}{}",
        ekoload_testserver::PATH_TOKEN
    );

    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
    });

    serve.await?;
    Ok(())
}
