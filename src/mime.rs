/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: mime.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-02 14:03:22
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-04 16:55:39
 */

use crate::error::Result;
use crate::sanitize::{sanitize_address_list, sanitize_filename, sanitize_header_value};
use crate::traits::{Attachment, Email};
use base64::prelude::*;
use std::fmt::Write;

const CRLF: &str = "\r\n";
const BASE64_LINE_LENGTH: usize = 76;

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Fresh random multipart boundary.
pub fn generate_boundary() -> String {
    let bytes: [u8; 16] = rand::random();
    format!("boundary-{}", hex::encode(bytes))
}

/// MIME type from the filename extension, `application/octet-stream` when
/// the extension is unknown.
pub fn mime_type_for(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_raw()
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string()
}

/// Renders `email` as an RFC 5322 message with CRLF line endings.
///
/// Only `From`, `To`, `Cc`, `Subject` and MIME headers are written. There is
/// never a `Bcc` header; blind recipients exist only in the envelope.
pub fn build_message(from: &str, email: &Email) -> Result<Vec<u8>> {
    build_message_with_boundary(from, email, &generate_boundary())
}

pub(crate) fn build_message_with_boundary(
    from: &str,
    email: &Email,
    boundary: &str,
) -> Result<Vec<u8>> {
    // Load every attachment first so nothing half built is ever returned
    let parts = email
        .attachments
        .iter()
        .map(|att| Ok((attachment_filename(att), att.read_content()?)))
        .collect::<Result<Vec<_>>>()?;

    let mut msg = String::new();
    write_header(&mut msg, "From", &sanitize_header_value(from));

    let to = sanitize_address_list(&email.to);
    if !to.is_empty() {
        write_header(&mut msg, "To", &to.join(", "));
    }
    let cc = sanitize_address_list(&email.cc);
    if !cc.is_empty() {
        write_header(&mut msg, "Cc", &cc.join(", "));
    }

    write_header(&mut msg, "Subject", &sanitize_header_value(&email.subject));
    write_header(&mut msg, "MIME-Version", "1.0");

    let body_type = format!("{}; charset=\"UTF-8\"", email.content_type());

    if parts.is_empty() {
        write_header(&mut msg, "Content-Type", &body_type);
        msg.push_str(CRLF);
        msg.push_str(&email.body);
        return Ok(msg.into_bytes());
    }

    write_header(
        &mut msg,
        "Content-Type",
        &format!("multipart/mixed; boundary=\"{}\"", boundary),
    );
    msg.push_str(CRLF);

    let _ = write!(msg, "--{}{}", boundary, CRLF);
    write_header(&mut msg, "Content-Type", &body_type);
    msg.push_str(CRLF);
    msg.push_str(&email.body);
    msg.push_str(CRLF);

    for (filename, content) in parts {
        let _ = write!(msg, "--{}{}", boundary, CRLF);
        write_header(&mut msg, "Content-Type", &mime_type_for(&filename));
        write_header(&mut msg, "Content-Transfer-Encoding", "base64");
        write_header(
            &mut msg,
            "Content-Disposition",
            &format!("attachment; filename=\"{}\"", filename),
        );
        msg.push_str(CRLF);
        msg.push_str(&wrap_base64(&content));
    }

    let _ = write!(msg, "--{}--{}", boundary, CRLF);
    Ok(msg.into_bytes())
}

/// Sanitized filename as it appears in `Content-Disposition`.
pub fn attachment_filename(attachment: &Attachment) -> String {
    sanitize_filename(&attachment.display_name())
}

/// Standard base64, one CRLF terminated line per 76 characters.
pub fn wrap_base64(content: &[u8]) -> String {
    let encoded = BASE64_STANDARD.encode(content);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE_LENGTH * 2 + 2);
    // base64 output is ASCII so byte chunks are valid str slices
    for chunk in encoded.as_bytes().chunks(BASE64_LINE_LENGTH) {
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push_str(CRLF);
    }
    out
}

fn write_header(msg: &mut String, name: &str, value: &str) {
    let _ = write!(msg, "{}: {}{}", name, value, CRLF);
}
