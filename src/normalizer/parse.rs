use super::StackFrame;
use once_cell::sync::Lazy;
use regex::Regex;

static NUMBERED_FRAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#\d+\s+(?P<rest>.*)$").expect("numbered frame regex"));

static ADDRESS_IN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^0x(?P<addr>[0-9a-fA-F]+)\s+in\s+(?P<body>.+)$").expect("address-in regex")
});

static ADDRESS_ONLY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^0x(?P<addr>[0-9a-fA-F]+)(\s+\(.*\))?$").expect("address-only regex")
});

static SYMBOL_OFFSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>[^\s()+]+)\+0x(?P<off>[0-9a-fA-F]+)$").expect("symbol+offset regex")
});

static BARE_SYMBOL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s(]+(\(.*\))?(\s+const)?$").expect("bare symbol regex"));

const UNSYMBOLIZED: &str = "??";
const ANONYMOUS_NAMESPACE: &str = "(anonymous namespace)";

fn parse_hex(digits: &str) -> Option<u64> {
    u64::from_str_radix(digits, 16).ok()
}

/// Extract the function name from `name(args) location` style text,
/// keeping template arguments intact
fn function_from_body(body: &str) -> StackFrame {
    let (prefix, tail) = match body.strip_prefix(ANONYMOUS_NAMESPACE) {
        Some(rest) => (ANONYMOUS_NAMESPACE, rest),
        None => ("", body),
    };

    let mut depth = 0i32;
    let mut end = tail.len();
    for (index, c) in tail.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth -= 1,
            '(' if depth <= 0 => {
                end = index;
                break;
            }
            c if c.is_whitespace() && depth <= 0 => {
                end = index;
                break;
            }
            _ => {}
        }
    }

    let name = format!("{}{}", prefix, &tail[..end]);

    if let Some(caps) = SYMBOL_OFFSET.captures(&name) {
        return StackFrame {
            function: caps["name"].to_string(),
            offset: parse_hex(&caps["off"]),
        };
    }

    if name.is_empty() {
        StackFrame::new(UNSYMBOLIZED)
    } else {
        StackFrame::new(name)
    }
}

/// Parse a single trace line into a frame.
///
/// The error is a human readable reason.
pub fn parse_frame_line(line: &str) -> Result<StackFrame, String> {
    if line.chars().any(|c| c.is_control() && c != '\t') {
        return Err("control characters in frame".to_string());
    }

    let line = line.trim();

    if let Some(caps) = NUMBERED_FRAME.captures(line) {
        let rest = caps["rest"].trim();

        if let Some(caps) = ADDRESS_IN.captures(rest) {
            return Ok(function_from_body(caps["body"].trim()));
        }

        if let Some(caps) = ADDRESS_ONLY.captures(rest) {
            return Ok(StackFrame {
                function: UNSYMBOLIZED.to_string(),
                offset: parse_hex(&caps["addr"]),
            });
        }

        if rest.is_empty() {
            return Err("numbered frame without content".to_string());
        }

        return Ok(function_from_body(rest));
    }

    if line.starts_with('#') {
        return Err("malformed numbered frame".to_string());
    }

    if let Some(caps) = SYMBOL_OFFSET.captures(line) {
        return Ok(StackFrame {
            function: caps["name"].to_string(),
            offset: parse_hex(&caps["off"]),
        });
    }

    if let Some(caps) = ADDRESS_ONLY.captures(line) {
        return Ok(StackFrame {
            function: UNSYMBOLIZED.to_string(),
            offset: parse_hex(&caps["addr"]),
        });
    }

    if BARE_SYMBOL.is_match(line) {
        return Ok(function_from_body(line));
    }

    Err(format!("unrecognized frame format: '{}'", line))
}
