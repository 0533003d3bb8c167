// src/notify/email.rs
//! Daily digest delivery over SMTP. Renders an HTML card per listing with a
//! plain-text alternative; the pipeline only cares whether the send
//! succeeded.

use crate::scrape::types::{ListingItem, Source};
use anyhow::{Context, Result};
use chrono::Utc;
use lettre::message::{Mailbox, Message, MultiPart};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

pub struct EmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailSender {
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("SMTP_HOST").context("SMTP_HOST missing")?;
        let user = std::env::var("SMTP_USER").context("SMTP_USER missing")?;
        let pass = std::env::var("SMTP_PASS").context("SMTP_PASS missing")?;
        let from_addr = std::env::var("SENDER_EMAIL").context("SENDER_EMAIL missing")?;
        let to_addr = std::env::var("RECIPIENT_EMAIL").context("RECIPIENT_EMAIL missing")?;

        let creds = Credentials::new(user, pass);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .context("invalid SMTP_HOST")?
            .credentials(creds)
            .build();

        let from = from_addr.parse().context("invalid SENDER_EMAIL")?;
        let to = to_addr.parse().context("invalid RECIPIENT_EMAIL")?;

        Ok(Self { mailer, from, to })
    }

    pub fn recipient(&self) -> String {
        self.to.email.to_string()
    }

    pub async fn send_digest(&self, items: &[ListingItem]) -> Result<()> {
        if items.is_empty() {
            anyhow::bail!("refusing to send an empty digest");
        }

        let subject = format!(
            "Plum Finds - {} New Items ({})",
            items.len(),
            Utc::now().format("%B %d")
        );

        let msg = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .multipart(MultiPart::alternative_plain_html(
                render_plain(items),
                render_html(items),
            ))
            .context("build digest email")?;

        self.mailer.send(msg).await.context("send digest email")?;
        tracing::info!(items = items.len(), "digest email sent");
        Ok(())
    }
}

fn source_badge(source: Source) -> (&'static str, &'static str) {
    match source {
        Source::Craigslist => ("CL", "#ff6600"),
        Source::Facebook => ("FB", "#1877f2"),
        Source::OfferUp => ("OU", "#00ab80"),
        Source::Mercari => ("MC", "#5356ee"),
        Source::Ebay => ("EB", "#e53238"),
        Source::Etsy => ("ET", "#f1641e"),
        Source::Poshmark => ("PM", "#822432"),
    }
}

fn truncated(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn price_label(price: Option<f64>) -> String {
    match price {
        Some(p) => format!("${p:.0}"),
        None => "Price not listed".to_string(),
    }
}

pub fn render_html(items: &[ListingItem]) -> String {
    let mut cards = String::new();
    for item in items {
        let (badge, badge_color) = source_badge(item.source);
        let score_percent = (item.color_score * 100.0).round() as i64;
        let score_color = if score_percent >= 70 {
            "#9b59b6"
        } else if score_percent >= 50 {
            "#8e44ad"
        } else {
            "#7f8c8d"
        };
        let image_url = item
            .image_urls
            .first()
            .map(String::as_str)
            .unwrap_or("https://via.placeholder.com/200x150/4a0080/ffffff?text=No+Image");
        let truncated_title = truncated(&item.title, 80);
        let title = html_escape::encode_text(&truncated_title);
        let location = html_escape::encode_text(
            item.location.as_deref().unwrap_or("Location not specified"),
        )
        .into_owned();
        let ships = if item.shippable {
            r#"<span style="background: #27ae60; color: white; padding: 2px 6px; border-radius: 3px; font-size: 10px;">Ships</span>"#
        } else {
            ""
        };

        cards.push_str(&format!(
            r#"<div style="background: #ffffff; border-radius: 12px; margin-bottom: 20px; padding: 15px;">
  <span style="background: {badge_color}; color: white; padding: 2px 8px; border-radius: 4px; font-size: 11px; font-weight: bold;">{badge}</span>
  <span style="background: {score_color}; color: white; padding: 2px 8px; border-radius: 4px; font-size: 11px;">{score_percent}% plum</span>
  <h3 style="margin: 8px 0; font-size: 16px;"><a href="{url}" style="color: #4a0080; text-decoration: none;">{title}</a></h3>
  <a href="{url}"><img src="{image_url}" alt="{title}" style="width: 200px; height: 150px; object-fit: cover; border-radius: 8px;"></a>
  <p style="margin: 8px 0 5px 0; font-size: 20px; font-weight: bold; color: #2c3e50;">{price}</p>
  <p style="margin: 0; font-size: 13px; color: #7f8c8d;">{location}</p>
  {ships}
</div>
"#,
            url = item.url,
            price = price_label(item.price),
        ));
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><meta name="viewport" content="width=device-width, initial-scale=1.0"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; background: #f5f0f7; margin: 0; padding: 20px;">
<div style="max-width: 600px; margin: 0 auto;">
  <div style="text-align: center; padding: 30px 20px; background: linear-gradient(135deg, #4a0080, #7b1fa2); border-radius: 12px 12px 0 0;">
    <h1 style="margin: 0; color: white; font-size: 28px;">Plum Finds</h1>
    <p style="margin: 10px 0 0 0; color: rgba(255,255,255,0.9); font-size: 14px;">{count} new plum accent pieces found today</p>
  </div>
  <div style="background: #f9f5fb; padding: 20px; border-radius: 0 0 12px 12px;">
{cards}
  </div>
</div>
</body>
</html>
"#,
        count = items.len(),
    )
}

pub fn render_plain(items: &[ListingItem]) -> String {
    let mut lines = vec![
        format!("PLUM FINDS - {} New Items", items.len()),
        format!("Date: {}", Utc::now().format("%B %d, %Y")),
        String::new(),
        "=".repeat(50),
        String::new(),
    ];

    for (i, item) in items.iter().enumerate() {
        lines.push(format!("{}. {}", i + 1, truncated(&item.title, 60)));
        lines.push(format!("   Price: {}", price_label(item.price)));
        lines.push(format!(
            "   Location: {}",
            item.location.as_deref().unwrap_or("Location not specified")
        ));
        lines.push(format!("   Source: {}", item.source));
        lines.push(format!("   Link: {}", item.url));
        lines.push(String::new());
    }

    lines.push("=".repeat(50));
    lines.push(String::new());
    lines.push("Sent by PlumFinder".to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ListingItem {
        let mut it = ListingItem::new(
            Source::Craigslist,
            "42",
            "Plum velvet <armchair>".to_string(),
            "https://sfbay.craigslist.org/42.html".to_string(),
        );
        it.price = Some(75.0);
        it.location = Some("Palo Alto".to_string());
        it.color_score = 0.82;
        it
    }

    #[test]
    fn html_escapes_titles_and_shows_score() {
        let html = render_html(&[sample()]);
        assert!(html.contains("Plum velvet &lt;armchair&gt;"));
        assert!(html.contains("82% plum"));
        assert!(html.contains("https://sfbay.craigslist.org/42.html"));
        assert!(!html.contains("<armchair>"));
    }

    #[test]
    fn plain_text_lists_every_item() {
        let mut other = sample();
        other.id = "cl_43".to_string();
        other.title = "Aubergine lamp".to_string();
        other.price = None;

        let text = render_plain(&[sample(), other]);
        assert!(text.contains("PLUM FINDS - 2 New Items"));
        assert!(text.contains("1. Plum velvet <armchair>"));
        assert!(text.contains("2. Aubergine lamp"));
        assert!(text.contains("Price not listed"));
        assert!(text.contains("Source: craigslist"));
    }

    #[test]
    fn missing_image_uses_placeholder() {
        let html = render_html(&[sample()]);
        assert!(html.contains("via.placeholder.com"));
    }
}
