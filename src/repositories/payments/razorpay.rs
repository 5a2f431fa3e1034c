use anyhow::bail;
use serde_json::json;

#[derive(Clone)]
pub struct RazorpayApi {
    url: String,
    key_id: String,
    key_secret: String,
    client: reqwest::Client,
}

impl RazorpayApi {
    pub fn new(url: String, key_id: String, key_secret: String) -> Self {
        Self {
            url,
            key_id,
            key_secret,
            client: reqwest::Client::new(),
        }
    }

    /// Creates a checkout order. `amount_minor` is already in paise.
    pub async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<serde_json::Value, anyhow::Error> {
        let payload = json!({
            "amount": amount_minor,
            "currency": currency,
            "receipt": receipt,
        });

        let response = self
            .client
            .post(format!("{}/v1/orders", self.url.trim_end_matches('/')))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            let description = body
                .pointer("/error/description")
                .and_then(|d| d.as_str())
                .unwrap_or("unknown error");
            bail!("Razorpay: {} ({})", description, status)
        }

        match body.get("id") {
            Some(_) => Ok(body),
            None => bail!("Razorpay: Bad response format."),
        }
    }
}
