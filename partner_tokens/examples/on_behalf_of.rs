use std::{sync::Arc, time::Duration};

use clap::Parser;
use partner_tokens::{
    exchange::OAuth2TokenExchange, store, ObjectId, Principal, Settings, TokenContext,
    UserAssertion,
};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The tenant whose authority issues the tokens, appended to `PARTNER_AUTHORITY`
    #[arg(long, env = "PARTNER_TENANT")]
    tenant: String,

    /// The object identifier of the signed-in user
    #[arg(short, long, env = "PARTNER_OBJECT_ID")]
    object_id: ObjectId,

    /// The signed-in user's identity token, exchanged on their behalf
    #[arg(short = 't', long, env = "PARTNER_USER_ASSERTION", hide_env_values = true)]
    assertion: UserAssertion,

    /// How many times to request a credential
    #[arg(short, long, default_value_t = 3)]
    requests: u32,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let settings = Settings::from_env()?;

    let protector = Arc::new(settings.protector()?);
    let store = store::build_store(&settings, protector).await?;

    let client = reqwest::Client::builder().https_only(true).build()?;
    let exchange = Arc::new(OAuth2TokenExchange::new(client));
    let context = TokenContext::from_settings(&settings, store, exchange);

    let authority = settings.tenant_authority(&opts.tenant);
    let principal = Principal::new(opts.object_id).with_assertion(opts.assertion);

    let mut interval = time::interval(Duration::from_secs(5));
    for attempt in 1..=opts.requests {
        interval.tick().await;

        let credential = context
            .partner_service_token(&authority, &principal)
            .await?;

        tracing::info!(
            attempt,
            token = format_args!("{:#?}", credential.partner_service_token()),
            expiry = credential.expires_at().0,
            "pulled partner service credential"
        );
    }

    Ok(())
}
