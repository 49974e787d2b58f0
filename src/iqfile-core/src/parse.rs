// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Text parsing helpers for the REST surface.

/// Parse a boolean request body.
///
/// Recognised tokens (case-insensitive, surrounding whitespace ignored):
/// `y`, `yes`, `true`, `1` and `n`, `no`, `false`, `0`. Anything else is
/// `None` and maps to a 400 upstream.
pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" | "1" => Some(true),
        "n" | "no" | "false" | "0" => Some(false),
        _ => None,
    }
}

/// Parse a float request body, `None` on malformed input.
pub fn parse_float(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Render a boolean the way the GET endpoints report it.
pub fn yes_no(val: bool) -> &'static str {
    if val {
        "yes"
    } else {
        "no"
    }
}
