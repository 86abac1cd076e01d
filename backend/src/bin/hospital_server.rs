//! Hospital (supplying) service

use medstock::ServiceKind;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    medstock::run(ServiceKind::Hospital).await
}
