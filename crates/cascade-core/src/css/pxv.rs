//! `pxv` unit conversion.
//!
//! `<n>pxv` means "n pixels at the design basis width". Each occurrence
//! becomes a `clamp()` that scales with the viewport and stops at the values
//! it would have at `siteMin` and `siteMax`:
//!
//! ```text
//! 10pxv  →  clamp(0px, 2.6667vw, 38.4px)        (defaults 0 / 375 / 1440)
//! ```
//!
//! With `writeVars`, a `:root { --pxv: … }` rule is prepended and each value
//! becomes `calc(var(--pxv) * n)`.

use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write as _;

use crate::plugin::{ResolveError, Transform, TransformContext, TransformError};

/// Conversion parameters.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PxvOptions {
    /// Viewport width below which values stop shrinking.
    pub site_min: f64,
    /// Viewport width at which `1pxv == 1px`.
    pub site_basis: f64,
    /// Viewport width above which values stop growing.
    pub site_max: f64,
    /// Emit a `--pxv` custom property and reference it.
    pub write_vars: bool,
}

impl Default for PxvOptions {
    fn default() -> Self {
        Self {
            site_min: 0.0,
            site_basis: 375.0,
            site_max: 1440.0,
            write_vars: false,
        }
    }
}

impl PxvOptions {
    fn validate(&self) -> Result<(), String> {
        if !(self.site_min.is_finite() && self.site_basis.is_finite() && self.site_max.is_finite()) {
            return Err("siteMin, siteBasis and siteMax must be finite numbers".to_string());
        }
        if self.site_basis <= 0.0 {
            return Err(format!("siteBasis must be positive, got {}", self.site_basis));
        }
        if self.site_min > self.site_max {
            return Err(format!(
                "siteMin ({}) must not exceed siteMax ({})",
                self.site_min, self.site_max
            ));
        }
        Ok(())
    }

    /// The fluid length for `n` pxv.
    #[must_use]
    pub fn clamp_for(&self, n: f64) -> String {
        let mut low = n * self.site_min / self.site_basis;
        let fluid = n * 100.0 / self.site_basis;
        let mut high = n * self.site_max / self.site_basis;
        if n < 0.0 {
            std::mem::swap(&mut low, &mut high);
        }
        format!(
            "clamp({}px, {}vw, {}px)",
            format_number(low),
            format_number(fluid),
            format_number(high)
        )
    }
}

/// Format with at most four decimals, without trailing zeros or `-0`.
fn format_number(value: f64) -> String {
    let mut text = format!("{value:.4}");
    if text.contains('.') {
        let trimmed = text.trim_end_matches('0').trim_end_matches('.').len();
        text.truncate(trimmed);
    }
    if text == "-0" {
        text = "0".to_string();
    }
    text
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b >= 0x80
}

fn is_ident_start(bytes: &[u8], i: usize) -> bool {
    match bytes[i] {
        b if b.is_ascii_alphabetic() || b == b'_' || b >= 0x80 => true,
        b'-' => bytes
            .get(i + 1)
            .is_some_and(|&n| n.is_ascii_alphabetic() || n == b'-' || n == b'_' || n >= 0x80),
        _ => false,
    }
}

/// Length of the number starting at `i`, or 0.
fn number_len(bytes: &[u8], i: usize) -> usize {
    let mut j = i;
    if matches!(bytes.get(j), Some(b'+' | b'-')) {
        j += 1;
    }
    let int_start = j;
    while bytes.get(j).is_some_and(u8::is_ascii_digit) {
        j += 1;
    }
    let mut has_digits = j > int_start;
    if bytes.get(j) == Some(&b'.') && bytes.get(j + 1).is_some_and(u8::is_ascii_digit) {
        j += 1;
        while bytes.get(j).is_some_and(u8::is_ascii_digit) {
            j += 1;
        }
        has_digits = true;
    }
    if !has_digits {
        return 0;
    }
    if matches!(bytes.get(j), Some(b'e' | b'E')) {
        let mut k = j + 1;
        if matches!(bytes.get(k), Some(b'+' | b'-')) {
            k += 1;
        }
        if bytes.get(k).is_some_and(u8::is_ascii_digit) {
            while bytes.get(k).is_some_and(u8::is_ascii_digit) {
                k += 1;
            }
            j = k;
        }
    }
    j - i
}

/// Replace every `<n>pxv` outside strings and comments.
#[must_use]
pub fn convert(css: &str, options: &PxvOptions) -> String {
    let bytes = css.as_bytes();
    let mut out = String::with_capacity(css.len());
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if b == b'/' && bytes.get(i + 1) == Some(&b'*') {
            i = css[i + 2..].find("*/").map_or(bytes.len(), |end| i + 2 + end + 2);
            continue;
        }

        if b == b'"' || b == b'\'' {
            i += 1;
            while i < bytes.len() && bytes[i] != b && bytes[i] != b'\n' {
                if bytes[i] == b'\\' {
                    i += 1;
                }
                i += 1;
            }
            i = (i + 1).min(bytes.len());
            continue;
        }

        if b == b'#' || is_ident_start(bytes, i) {
            i += 1;
            while i < bytes.len() && is_ident_byte(bytes[i]) {
                i += 1;
            }
            continue;
        }

        let len = number_len(bytes, i);
        if len == 0 {
            i += 1;
            continue;
        }

        let unit_start = i + len;
        let is_pxv = css[unit_start..].starts_with("pxv")
            && !bytes.get(unit_start + 3).is_some_and(|&n| is_ident_byte(n));

        if is_pxv {
            if let Ok(n) = css[i..unit_start].parse::<f64>() {
                out.push_str(&css[copied..i]);
                if options.write_vars {
                    let _ = write!(out, "calc(var(--pxv) * {})", format_number(n));
                } else {
                    out.push_str(&options.clamp_for(n));
                }
                i = unit_start + 3;
                copied = i;
                continue;
            }
        }

        i = unit_start;
    }

    out.push_str(&css[copied..]);

    if options.write_vars {
        format!(":root {{\n  --pxv: {};\n}}\n{out}", options.clamp_for(1.0))
    } else {
        out
    }
}

/// `postcss-pxv` as a pipeline transform.
#[derive(Debug, Clone)]
pub struct PxvTransform {
    options: PxvOptions,
}

impl PxvTransform {
    #[must_use]
    pub fn new(options: PxvOptions) -> Self {
        Self { options }
    }

    pub fn from_options(options: &Value) -> Result<Self, ResolveError> {
        let invalid = |message: String| ResolveError::InvalidOptions {
            name: "postcss-pxv".to_string(),
            message,
        };
        let parsed: PxvOptions =
            serde_json::from_value(options.clone()).map_err(|e| invalid(e.to_string()))?;
        parsed.validate().map_err(invalid)?;
        Ok(Self::new(parsed))
    }

    #[must_use]
    pub fn options(&self) -> &PxvOptions {
        &self.options
    }
}

impl Transform for PxvTransform {
    fn name(&self) -> &str {
        "postcss-pxv"
    }

    fn transform(&self, css: &str, _ctx: &TransformContext<'_>) -> Result<String, TransformError> {
        Ok(convert(css, &self.options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defaults(css: &str) -> String {
        convert(css, &PxvOptions::default())
    }

    #[test]
    fn test_basic_conversion() {
        assert_eq!(
            defaults("a { margin: 10pxv; }"),
            "a { margin: clamp(0px, 2.6667vw, 38.4px); }"
        );
    }

    #[test]
    fn test_basis_value_is_exact_pixels() {
        let options = PxvOptions {
            site_min: 320.0,
            site_basis: 400.0,
            site_max: 800.0,
            write_vars: false,
        };
        assert_eq!(options.clamp_for(4.0), "clamp(3.2px, 1vw, 8px)");
    }

    #[test]
    fn test_negative_swaps_bounds() {
        assert_eq!(defaults("-10pxv"), "clamp(-38.4px, -2.6667vw, 0px)");
    }

    #[test]
    fn test_decimal_and_shorthand() {
        assert_eq!(
            defaults("padding: .5pxv 1.5pxv;"),
            "padding: clamp(0px, 0.1333vw, 1.92px) clamp(0px, 0.4vw, 5.76px);"
        );
    }

    #[test]
    fn test_other_units_untouched() {
        let css = "a { margin: 10px 2em 5pxvw 3vw 50%; width: calc(100% - 8px); }";
        assert_eq!(defaults(css), css);
    }

    #[test]
    fn test_strings_and_comments_untouched() {
        let css = r#"a::before { content: "10pxv"; } /* 10pxv */ b { font-family: '4pxv'; }"#;
        assert_eq!(defaults(css), css);
    }

    #[test]
    fn test_identifiers_untouched() {
        let css = ".gap-10pxv, #x10pxv { --size-2pxv: red; animation: fade10pxv 1s; }";
        assert_eq!(defaults(css), css);
    }

    #[test]
    fn test_inside_calc() {
        assert_eq!(
            defaults("calc(1pxv + 2px)"),
            "calc(clamp(0px, 0.2667vw, 3.84px) + 2px)"
        );
    }

    #[test]
    fn test_write_vars() {
        let options = PxvOptions {
            write_vars: true,
            ..Default::default()
        };
        let out = convert("a { margin: 10pxv -2pxv; }\n", &options);
        assert_eq!(
            out,
            ":root {\n  --pxv: clamp(0px, 0.2667vw, 3.84px);\n}\na { margin: calc(var(--pxv) * 10) calc(var(--pxv) * -2); }\n"
        );
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(2.0), "2");
        assert_eq!(format_number(2.66666), "2.6667");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(-0.00001), "0");
        assert_eq!(format_number(38.4), "38.4");
    }

    #[test]
    fn test_options_from_json() {
        let transform = PxvTransform::from_options(&json!({ "siteBasis": 390, "writeVars": true })).unwrap();
        assert_eq!(transform.options().site_basis, 390.0);
        assert_eq!(transform.options().site_max, 1440.0);
        assert!(transform.options().write_vars);
    }

    #[test]
    fn test_invalid_options() {
        for options in [
            json!({ "siteBasis": 0 }),
            json!({ "siteMin": 2000, "siteMax": 1000 }),
            json!({ "siteBasis": "wide" }),
        ] {
            assert!(matches!(
                PxvTransform::from_options(&options),
                Err(ResolveError::InvalidOptions { .. })
            ));
        }
    }

    #[test]
    fn test_multibyte_text_survives() {
        let css = "/* é */ a::after { content: \"→\"; margin: 1pxv; }";
        assert!(defaults(css).starts_with("/* é */ a::after { content: \"→\"; margin: clamp("));
    }
}
