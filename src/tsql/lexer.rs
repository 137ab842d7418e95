use crate::error::{Result, TsqlError};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    QuotedIdent(String),
    Str(String),
    Integer(i64),
    Unsigned(u64),
    Number(f64),
    /// Nanoseconds.
    Duration(i64),
    Regex(String),
    Param(String),
    LParen,
    RParen,
    Comma,
    Dot,
    DoubleColon,
    Semicolon,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Eq,
    Neq,
    EqRegex,
    NeqRegex,
    Lt,
    Lte,
    Gt,
    Gte,
    Eof,
}

impl Token {
    pub fn is_keyword(&self, kw: &str) -> bool {
        matches!(self, Token::Ident(s) if s.eq_ignore_ascii_case(kw))
    }
}

/// Splits statement text into tokens. A `/` directly after `=~`, `!~` or
/// `FROM` starts a regex literal; elsewhere it is division.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        // -- line comment
        if c == '-' && chars.get(i + 1) == Some(&'-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        let regex_allowed = matches!(tokens.last(), Some(Token::EqRegex) | Some(Token::NeqRegex))
            || tokens.last().is_some_and(|t| t.is_keyword("FROM"));

        let token = match c {
            '(' => {
                i += 1;
                Token::LParen
            }
            ')' => {
                i += 1;
                Token::RParen
            }
            ',' => {
                i += 1;
                Token::Comma
            }
            ';' => {
                i += 1;
                Token::Semicolon
            }
            '+' => {
                i += 1;
                Token::Add
            }
            '-' => {
                i += 1;
                Token::Sub
            }
            '*' => {
                i += 1;
                Token::Mul
            }
            '%' => {
                i += 1;
                Token::Mod
            }
            '&' => {
                i += 1;
                Token::BitAnd
            }
            '|' => {
                i += 1;
                Token::BitOr
            }
            '^' => {
                i += 1;
                Token::BitXor
            }
            '/' if regex_allowed => {
                let (pattern, next) = scan_regex(&chars, i + 1)?;
                i = next;
                Token::Regex(pattern)
            }
            '/' => {
                i += 1;
                Token::Div
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                i += 2;
                Token::DoubleColon
            }
            '=' => match chars.get(i + 1) {
                Some('~') => {
                    i += 2;
                    Token::EqRegex
                }
                Some('=') => {
                    i += 2;
                    Token::Eq
                }
                _ => {
                    i += 1;
                    Token::Eq
                }
            },
            '!' => match chars.get(i + 1) {
                Some('=') => {
                    i += 2;
                    Token::Neq
                }
                Some('~') => {
                    i += 2;
                    Token::NeqRegex
                }
                _ => return Err(TsqlError::Parse(format!("unexpected '!' at offset {i}"))),
            },
            '<' => match chars.get(i + 1) {
                Some('=') => {
                    i += 2;
                    Token::Lte
                }
                Some('>') => {
                    i += 2;
                    Token::Neq
                }
                _ => {
                    i += 1;
                    Token::Lt
                }
            },
            '>' => match chars.get(i + 1) {
                Some('=') => {
                    i += 2;
                    Token::Gte
                }
                _ => {
                    i += 1;
                    Token::Gt
                }
            },
            '\'' => {
                let (s, next) = scan_quoted(&chars, i + 1, '\'')?;
                i = next;
                Token::Str(s)
            }
            '"' => {
                let (s, next) = scan_quoted(&chars, i + 1, '"')?;
                i = next;
                Token::QuotedIdent(s)
            }
            '$' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_ident_char(chars[end]) {
                    end += 1;
                }
                if end == start {
                    return Err(TsqlError::Parse(format!("empty bound parameter at offset {i}")));
                }
                i = end;
                Token::Param(chars[start..end].iter().collect())
            }
            '.' if !chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) => {
                i += 1;
                Token::Dot
            }
            c if c.is_ascii_digit() || c == '.' => {
                let (token, next) = scan_number(&chars, i)?;
                i = next;
                token
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                Token::Ident(chars[start..i].iter().collect())
            }
            other => return Err(TsqlError::Parse(format!("unexpected character '{other}' at offset {i}"))),
        };
        tokens.push(token);
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn scan_quoted(chars: &[char], mut i: usize, quote: char) -> Result<(String, usize)> {
    let mut out = String::new();
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            match chars.get(i + 1) {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('\\') => out.push('\\'),
                Some(&q) if q == quote => out.push(q),
                Some(&other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => break,
            }
            i += 2;
            continue;
        }
        if c == quote {
            return Ok((out, i + 1));
        }
        out.push(c);
        i += 1;
    }
    Err(TsqlError::Parse(format!("unterminated {quote} quoted literal")))
}

fn scan_regex(chars: &[char], mut i: usize) -> Result<(String, usize)> {
    let mut out = String::new();
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && chars.get(i + 1) == Some(&'/') {
            out.push('/');
            i += 2;
            continue;
        }
        if c == '/' {
            return Ok((out, i + 1));
        }
        out.push(c);
        i += 1;
    }
    Err(TsqlError::Parse("unterminated regex literal".to_string()))
}

fn duration_unit(suffix: &str) -> Option<i64> {
    match suffix {
        "ns" => Some(1),
        "u" | "us" | "µ" | "µs" => Some(1_000),
        "ms" => Some(1_000_000),
        "s" => Some(1_000_000_000),
        "m" => Some(60_000_000_000),
        "h" => Some(3_600_000_000_000),
        "d" => Some(86_400_000_000_000),
        "w" => Some(604_800_000_000_000),
        _ => None,
    }
}

fn scan_number(chars: &[char], start: usize) -> Result<(Token, usize)> {
    let mut i = start;
    let mut is_float = false;
    while i < chars.len() && (chars[i].is_ascii_digit() || (chars[i] == '.' && !is_float)) {
        if chars[i] == '.' {
            is_float = true;
        }
        i += 1;
    }
    let text: String = chars[start..i].iter().collect();

    // A unit glued to an integer makes a duration, e.g. `5m` or `100ms`.
    if !is_float && i < chars.len() && is_ident_start(chars[i]) {
        let unit_start = i;
        let mut end = i;
        while end < chars.len() && is_ident_char(chars[end]) {
            end += 1;
        }
        let suffix: String = chars[unit_start..end].iter().collect();
        let unit = duration_unit(&suffix)
            .ok_or_else(|| TsqlError::Parse(format!("invalid duration '{text}{suffix}'")))?;
        let n: i64 = text
            .parse()
            .map_err(|_| TsqlError::Parse(format!("invalid duration '{text}{suffix}'")))?;
        let nanos = n
            .checked_mul(unit)
            .ok_or_else(|| TsqlError::Parse(format!("duration '{text}{suffix}' overflows")))?;
        return Ok((Token::Duration(nanos), end));
    }

    if is_float {
        let v: f64 = text
            .parse()
            .map_err(|_| TsqlError::Parse(format!("invalid number '{text}'")))?;
        return Ok((Token::Number(v), i));
    }
    if let Ok(v) = text.parse::<i64>() {
        return Ok((Token::Integer(v), i));
    }
    let v: u64 = text
        .parse()
        .map_err(|_| TsqlError::Parse(format!("integer '{text}' out of range")))?;
    Ok((Token::Unsigned(v), i))
}
