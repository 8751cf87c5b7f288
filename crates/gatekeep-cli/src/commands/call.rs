//! Call command - authenticated API request.

use anyhow::{Context, Result};
use gatekeep_core::{ApiRequest, AuthError, Config};
use reqwest::Method;

use super::open_client;
use crate::ui;

/// Call command arguments.
#[derive(Debug, Clone)]
pub struct CallArgs {
    /// Request path.
    pub path: String,
    /// HTTP method name.
    pub method: String,
    /// JSON body.
    pub data: Option<String>,
    /// `key=value` query parameters.
    pub query: Vec<String>,
}

impl CallArgs {
    fn request(&self) -> Result<ApiRequest> {
        let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .with_context(|| format!("Invalid HTTP method: {}", self.method))?;

        let mut request = ApiRequest::new(method, self.path.clone());
        for pair in &self.query {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("Query parameter must be key=value: {pair}"))?;
            request = request.with_query(key, value);
        }

        if let Some(data) = &self.data {
            let body: serde_json::Value =
                serde_json::from_str(data).context("Request body is not valid JSON")?;
            request = request.with_json(body);
        }

        Ok(request)
    }
}

/// Run the call command.
pub async fn run_call(config: &Config, args: CallArgs) -> Result<()> {
    let request = args.request()?;
    let (client, _) = open_client(config).await?;

    match client.invoke(&request).await {
        Ok(response) => {
            print_body(&response.body);
            Ok(())
        }
        Err(AuthError::Api { status, body }) => {
            ui::error(&format!("HTTP {status}"));
            print_body(&body);
            anyhow::bail!("Request failed with status {status}")
        }
        Err(e) if e.requires_login() => {
            ui::error(&e.to_string());
            ui::info("Run 'gatekeep login' to sign in");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_body(body: &str) {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{body}"),
        },
        Err(_) if body.is_empty() => {}
        Err(_) => println!("{body}"),
    }
}
