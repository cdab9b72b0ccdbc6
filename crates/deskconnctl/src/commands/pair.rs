//! Pairing commands

use anyhow::{anyhow, bail, Result};
use serde_json::{json, Value};

use dc_protocol::procedures;

use crate::client::RpcClient;

/// Ask the agent for a fresh pairing code
pub async fn start(client: &mut RpcClient) -> Result<String> {
    let args = client.call(procedures::START_PAIRING, Vec::new()).await?;
    args.first()
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Agent returned no pairing code"))
}

/// Claim a pairing code on behalf of a device. Returns the session id.
pub async fn claim(
    client: &mut RpcClient,
    device_id: &str,
    code: &str,
    label: Option<&str>,
) -> Result<String> {
    let mut args = vec![json!(device_id), json!(code)];
    if let Some(label) = label {
        args.push(json!(label));
    }
    outcome(client.call(procedures::PAIR, args).await?)
}

/// Send the device's public key. Returns the agent's public key.
pub async fn exchange(
    client: &mut RpcClient,
    session_id: &str,
    device_id: &str,
    public_key: &str,
) -> Result<String> {
    let args = vec![json!(session_id), json!(device_id), json!(public_key)];
    outcome(client.call(procedures::EXCHANGE_KEYS, args).await?)
}

/// Interpret a `[true, value]` / `[false, reason]` reply
fn outcome(args: Vec<Value>) -> Result<String> {
    let detail = args
        .get(1)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match args.first().and_then(Value::as_bool) {
        Some(true) => Ok(detail),
        Some(false) => bail!("Pairing failed: {}", detail),
        None => bail!("Unexpected reply from agent: {:?}", args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_success() {
        assert_eq!(
            outcome(vec![json!(true), json!("dev-1-1700000000")]).unwrap(),
            "dev-1-1700000000"
        );
    }

    #[test]
    fn test_outcome_failure_carries_reason() {
        let err = outcome(vec![json!(false), json!("code expired")]).unwrap_err();
        assert_eq!(err.to_string(), "Pairing failed: code expired");
    }

    #[test]
    fn test_outcome_malformed() {
        assert!(outcome(vec![]).is_err());
        assert!(outcome(vec![json!("yes")]).is_err());
    }
}
