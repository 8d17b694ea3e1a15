/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: sanitize.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-02 10:20:03
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-02 11:02:17
 */

//! Header value cleanup. Every user supplied string passes through here
//! before it is written into a header, an SMTP command or a filename.

/// Filename used when nothing usable is left after sanitizing.
pub const DEFAULT_ATTACHMENT_NAME: &str = "attachment";

/// Strips CR and LF, then trims surrounding whitespace.
pub fn sanitize_header_value(value: &str) -> String {
    value
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Sanitizes each address and drops the ones that end up empty.
pub fn sanitize_address_list<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    values
        .iter()
        .map(|v| sanitize_header_value(v.as_ref()))
        .filter(|v| !v.is_empty())
        .collect()
}

pub fn sanitize_filename(value: &str) -> String {
    let cleaned = sanitize_header_value(value).replace('"', "");
    if cleaned.is_empty() {
        DEFAULT_ATTACHMENT_NAME.to_string()
    } else {
        cleaned
    }
}
