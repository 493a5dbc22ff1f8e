#[tokio::main]
async fn main() -> anyhow::Result<()> {
    athlinked::start_server().await
}
