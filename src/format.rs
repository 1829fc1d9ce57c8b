use std::{
    borrow::Cow,
    fmt::{Display, Write},
    sync::OnceLock,
};

use regex::Regex;

/// Longest entity we bother decoding, `&#x10FFFF;` included.
const MAX_ENTITY_LEN: usize = 10;

/// Turns raw tweet text into Discord markdown.
///
/// Entities are decoded, `*` and `>` escaped, `@handles` linked to their
/// profile. With `quote` every line (empty ones too) gets a `> ` marker.
pub fn format_text(text: &str, quote: bool) -> String {
    let escaped = MarkdownEscaped(&decode_entities(text)).to_string();
    let linked = link_mentions(&escaped);

    if quote {
        Quoted(&linked).to_string()
    } else {
        linked.into_owned()
    }
}

/// Escapes characters Discord would otherwise render as markup.
pub struct MarkdownEscaped<'a>(pub &'a str);

impl<'a> Display for MarkdownEscaped<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for c in self.0.chars() {
            match c {
                '*' => f.write_str("\\*")?,
                '>' => f.write_str("\\>")?,
                _ => f.write_char(c)?,
            }
        }

        Ok(())
    }
}

/// Renders text as a block quote.
pub struct Quoted<'a>(pub &'a str);

impl<'a> Display for Quoted<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("> ")?;
        for c in self.0.chars() {
            match c {
                '\n' => f.write_str("\n> ")?,
                _ => f.write_char(c)?,
            }
        }

        Ok(())
    }
}

/// The API only escapes `&`, `<` and `>`, but numeric references show up
/// in older tweets.
pub fn decode_entities(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];

        let decoded = rest
            .find(';')
            .filter(|&end| end <= MAX_ENTITY_LEN)
            .and_then(|end| decode_entity(&rest[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);

    Cow::Owned(out)
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

fn link_mentions(text: &str) -> Cow<'_, str> {
    static MENTION: OnceLock<Regex> = OnceLock::new();
    let mention = MENTION.get_or_init(|| {
        Regex::new(r"\B@([A-Za-z0-9_]{1,15})\b").expect("mention pattern is valid")
    });

    mention.replace_all(text, "[@${1}](https://twitter.com/${1})")
}
