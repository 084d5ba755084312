use crate::telegram::types::{
    ApiResponse, File, ReplyKeyboardMarkup, ReplyParameters, SendMessage, Update, User,
};
use anyhow::{Context, Result};
use reqwest::blocking::{Client, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
// Long polls are held open by the server for `timeout` seconds; allow slack.
const POLL_SLACK: Duration = Duration::from_secs(15);
// Covers the whole transfer, body included. Bot API files are capped at
// 20 MB, so this only trips on a stalled connection.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Blocking Bot API client. The token is part of every URL, so errors are
/// stripped of their URL before they are surfaced.
pub struct BotApi {
    client: Client,
    base_url: String,
    token: String,
    download_timeout: Duration,
}

#[derive(Serialize)]
struct GetUpdates<'a> {
    offset: Option<i64>,
    timeout: u64,
    allowed_updates: &'a [&'a str],
}

#[derive(Serialize)]
struct GetFile<'a> {
    file_id: &'a str,
}

fn redact(err: reqwest::Error) -> reqwest::Error {
    err.without_url()
}

impl BotApi {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        // Timeouts are set per request: long polls and downloads differ.
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None::<Duration>)
            .build()
            .map_err(redact)
            .context("failed to build http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            token: token.to_string(),
            download_timeout: DOWNLOAD_TIMEOUT,
        })
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.base_url, self.token)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "{}/file/bot{}/{}",
            self.base_url,
            self.token,
            file_path.trim_start_matches('/')
        )
    }

    fn call<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<T> {
        let resp = self
            .client
            .post(self.method_url(method))
            .json(body)
            .timeout(timeout)
            .send()
            .map_err(redact)
            .with_context(|| format!("bot api {method} request failed"))?;
        let parsed: ApiResponse<T> = resp
            .json()
            .map_err(redact)
            .with_context(|| format!("bot api {method} returned unreadable body"))?;

        if !parsed.ok {
            anyhow::bail!(
                "bot api {method} failed: {} ({})",
                parsed.description.unwrap_or_default(),
                parsed.error_code.unwrap_or_default()
            );
        }
        parsed
            .result
            .with_context(|| format!("bot api {method} returned ok without result"))
    }

    pub fn get_me(&self) -> Result<User> {
        self.call("getMe", &serde_json::json!({}), REQUEST_TIMEOUT)
    }

    pub fn get_updates(&self, offset: Option<i64>, timeout_secs: u64) -> Result<Vec<Update>> {
        let body = GetUpdates {
            offset,
            timeout: timeout_secs,
            allowed_updates: &["message"],
        };
        self.call(
            "getUpdates",
            &body,
            Duration::from_secs(timeout_secs) + POLL_SLACK,
        )
    }

    pub fn send_message(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Result<()> {
        let body = SendMessage {
            chat_id,
            text,
            reply_parameters: reply_to.map(|message_id| ReplyParameters {
                message_id,
                allow_sending_without_reply: true,
            }),
            reply_markup: ReplyKeyboardMarkup::list_button(),
        };
        let _: serde_json::Value = self.call("sendMessage", &body, REQUEST_TIMEOUT)?;
        Ok(())
    }

    pub fn get_file(&self, file_id: &str) -> Result<File> {
        self.call("getFile", &GetFile { file_id }, REQUEST_TIMEOUT)
    }

    /// Open a streaming download of a file previously resolved via `get_file`.
    pub fn download(&self, file_path: &str) -> Result<Response> {
        let resp = self
            .client
            .get(self.file_url(file_path))
            .timeout(self.download_timeout)
            .send()
            .map_err(redact)
            .context("file download request failed")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("file download failed with status {status}");
        }
        Ok(resp)
    }
}
