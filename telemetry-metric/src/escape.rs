//! Escaping rules for the lexical classes of the line protocol.
use std::borrow::Cow;

/// A lexical class of the line protocol, and the characters that must be escaped within it.
///
/// Each class escapes its reserved characters by prefixing them with a backslash. Unescaping only
/// removes a backslash when it precedes a reserved character of the same class, so any other
/// backslash is kept as-is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Escaper {
    /// Measurement names: comma and space.
    Name,

    /// Tag keys and tag values: comma, double quote, space, and equals sign.
    Tag,

    /// Field keys: comma, double quote, space, and equals sign.
    FieldKey,

    /// Quoted string field values: double quote and backslash.
    StringValue,
}

impl Escaper {
    const fn reserved(self) -> &'static [u8] {
        match self {
            Escaper::Name => b", ",
            Escaper::Tag | Escaper::FieldKey => b",\" =",
            Escaper::StringValue => b"\"\\",
        }
    }

    pub(crate) fn is_reserved(self, b: u8) -> bool {
        self.reserved().contains(&b)
    }

    /// Escapes `s`, borrowing it when nothing needs escaping.
    pub fn escape(self, s: &str) -> Cow<'_, str> {
        if !s.bytes().any(|b| self.is_reserved(b)) {
            return Cow::Borrowed(s);
        }

        let mut escaped = String::with_capacity(self.escaped_len(s));
        for c in s.chars() {
            if c.is_ascii() && self.is_reserved(c as u8) {
                escaped.push('\\');
            }
            escaped.push(c);
        }

        Cow::Owned(escaped)
    }

    /// Unescapes `s`, borrowing it when it contains no escape sequence.
    pub fn unescape(self, s: &str) -> Cow<'_, str> {
        if !s.contains('\\') {
            return Cow::Borrowed(s);
        }

        let mut unescaped = String::with_capacity(s.len());
        let mut chars = s.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(&next) = chars.peek() {
                    if next.is_ascii() && self.is_reserved(next as u8) {
                        unescaped.push(next);
                        chars.next();
                        continue;
                    }
                }
            }
            unescaped.push(c);
        }

        Cow::Owned(unescaped)
    }

    /// Returns the length, in bytes, of `s` once escaped.
    pub fn escaped_len(self, s: &str) -> usize {
        s.len() + s.bytes().filter(|b| self.is_reserved(*b)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::Escaper;
    use std::borrow::Cow;

    #[test]
    fn escape() {
        // Cases are defined as: escaper, input, expected output.
        let cases = [
            (Escaper::Name, "cpu", "cpu"),
            (Escaper::Name, "cpu load", "cpu\\ load"),
            (Escaper::Name, "cpu,load", "cpu\\,load"),
            (Escaper::Name, "a=b\"c", "a=b\"c"),
            (Escaper::Tag, "location place", "location\\ place"),
            (Escaper::Tag, "a=b,c\"d", "a\\=b\\,c\\\"d"),
            (Escaper::FieldKey, "x y=z", "x\\ y\\=z"),
            (Escaper::StringValue, "say \"hi\"", "say \\\"hi\\\""),
            (Escaper::StringValue, "C:\\temp", "C:\\\\temp"),
            (Escaper::StringValue, "plain, with spaces", "plain, with spaces"),
        ];

        for (escaper, input, expected) in cases {
            assert_eq!(escaper.escape(input), expected);
            assert_eq!(escaper.escaped_len(input), expected.len());
        }
    }

    #[test]
    fn unescape() {
        let cases = [
            (Escaper::Name, "cpu\\ load", "cpu load"),
            (Escaper::Name, "cpu\\=load", "cpu\\=load"),
            (Escaper::Tag, "location\\ place", "location place"),
            (Escaper::Tag, "a\\=b\\,c\\\"d", "a=b,c\"d"),
            (Escaper::Tag, "trailing\\", "trailing\\"),
            (Escaper::StringValue, "say \\\"hi\\\"", "say \"hi\""),
            (Escaper::StringValue, "C:\\\\temp", "C:\\temp"),
            (Escaper::StringValue, "\\n stays", "\\n stays"),
        ];

        for (escaper, input, expected) in cases {
            assert_eq!(escaper.unescape(input), expected);
        }
    }

    #[test]
    fn borrows_when_untouched() {
        assert!(matches!(Escaper::Tag.escape("host"), Cow::Borrowed(_)));
        assert!(matches!(Escaper::Tag.unescape("host"), Cow::Borrowed(_)));
        assert!(matches!(Escaper::Name.escape("cpu load"), Cow::Owned(_)));
    }

    #[test]
    fn unicode_passthrough() {
        assert_eq!(Escaper::Tag.escape("café au lait"), "café\\ au\\ lait");
        assert_eq!(Escaper::Tag.unescape("café\\ au\\ lait"), "café au lait");
    }
}
