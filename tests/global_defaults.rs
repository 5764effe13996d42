//! Process-wide registry, chain and configuration. Kept to a single test so
//! nothing else in this binary observes the shared state mid-change.

mod common;

use std::time::Duration;

use async_trait::async_trait;
use common::RecordingTransport;
use llm_relay::config::{CONFIG_PATH_ENV, global_config};
use llm_relay::middleware::{CallContext, Next};
use llm_relay::tools::{ToolParameters, ToolSelection};
use llm_relay::{
    CallParams, ClientError, ClientSession, Middleware, MiddlewareChain, ProviderTag,
    ResponseEnvelope, ToolRegistry, ToolSpec,
};
use serde_json::{Map, Value, json};

struct Tag;

#[async_trait]
impl Middleware for Tag {
    async fn call(
        &self,
        _ctx: &CallContext,
        next: Next<'_>,
    ) -> Result<ResponseEnvelope, ClientError> {
        let mut response = next.run().await?;
        response.data_mut()["tagged"] = json!(true);
        Ok(response)
    }
}

#[tokio::test]
async fn sessions_share_process_wide_state() {
    ClientSession::configure(|config| {
        config.context_length = 1;
        config.timeout = Some(Duration::from_secs(45));
    });
    ClientSession::register_tool(ToolSpec::new(
        "clock",
        "Current time",
        ToolParameters::new(),
        |_args: Map<String, Value>| -> Result<Value, ClientError> { Ok(json!("12:00")) },
    ));
    ClientSession::add_middleware(Tag);

    let transport = RecordingTransport::new(ProviderTag::OpenAi);
    let session = temp_env::with_var_unset(CONFIG_PATH_ENV, || {
        ClientSession::builder("gpt-4")
            .transport(transport.clone())
            .build()
    })
    .expect("session");

    assert_eq!(session.context_length(), 1);
    assert_eq!(session.timeout(), Some(Duration::from_secs(45)));
    assert_eq!(global_config().context_length, 1);

    session.set_raw(true);
    let params = CallParams::new().with("tools", ToolSelection::All.to_value());
    let output = session.chat("What time is it?", params).await.expect("chat");
    let envelope = output.as_envelope().expect("raw envelope");
    assert_eq!(envelope.pointer("/tagged"), Some(&json!(true)));
    assert_eq!(transport.last_chat().tools[0].name, "clock");

    assert_eq!(MiddlewareChain::global().len(), 1);
    ClientSession::clear_middlewares();
    assert!(MiddlewareChain::global().is_empty());

    assert!(ClientSession::disable_tool("clock"));
    assert!(!ToolRegistry::global().contains("clock"));
    let params = CallParams::new().with("tools", json!(["clock"]));
    assert!(matches!(
        session.chat("Again", params).await,
        Err(ClientError::UnknownTool { .. })
    ));
}
