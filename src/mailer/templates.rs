// src/mailer/templates.rs
use chrono::{Datelike, Utc};
use serde::Serialize;

use crate::queue::EmailType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Template {
    Welcome,
    Otp,
}

impl Template {
    pub fn for_email(email_type: EmailType) -> Self {
        match email_type {
            EmailType::ResetPassword => Template::Otp,
            EmailType::Welcome | EmailType::Login => Template::Welcome,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateData {
    pub name: String,
    pub otp: Option<String>,
    pub app_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    pub html: String,
}

pub fn subject(template: Template, data: &TemplateData) -> String {
    match template {
        Template::Otp => format!("Hello {}, here is your OTP", data.name),
        Template::Welcome => format!("Hello {}, welcome to {}", data.name, data.app_name),
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn layout(app: &str, heading: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\" /></head>\
         <body style=\"font-family:Arial,sans-serif;background:#f6f9fc;margin:0\">\
         <div style=\"max-width:600px;margin:20px auto;background:#fff;padding:30px;border-radius:12px\">\
         <h1 style=\"text-align:center;color:#2563eb\">{heading}</h1>{body}\
         <p style=\"margin-top:30px;font-size:12px;color:#888;text-align:center\">&copy; {year} {app}. All rights reserved.</p>\
         </div></body></html>",
        heading = heading,
        body = body,
        year = Utc::now().year(),
        app = app,
    )
}

pub fn render(template: Template, data: &TemplateData) -> Rendered {
    let app = escape_html(&data.app_name);
    let name = escape_html(&data.name);
    match template {
        Template::Otp => {
            let otp = data.otp.as_deref().unwrap_or_default();
            Rendered {
                text: format!(
                    "Your OTP is {} for {} (valid for 10 minutes).",
                    otp, data.app_name
                ),
                html: layout(
                    &app,
                    "Verify your email",
                    &format!(
                        "<p>Hello {name},</p><p>Use this one-time password to continue. It is valid for <b>10 minutes</b>.</p>\
                         <p style=\"font-size:32px;letter-spacing:8px;font-weight:bold;text-align:center\">{otp}</p>\
                         <p>If you did not request this, you can ignore this email.</p>",
                        name = name,
                        otp = escape_html(otp),
                    ),
                ),
            }
        }
        Template::Welcome => Rendered {
            text: format!(
                "Welcome aboard, {}! We're excited to have you on {}.",
                data.name, data.app_name
            ),
            html: layout(
                &app,
                &format!("Welcome to {}!", app),
                &format!(
                    "<p>Hi <b>{name}</b>,</p><p>You have successfully signed up for {app}. \
                     Start exploring study materials and bookmark what you need.</p>",
                    name = name,
                    app = app,
                ),
            ),
        },
    }
}
