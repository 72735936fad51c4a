// Program text format
//
// A program is a list of bytes written as whitespace separated tokens:
//
//   42 0x3a     byte literals, decimal or hex
//   '+' 'z'     a quoted character, any printable ASCII
//   + - @       an operator character on its own
//   # ...       comment to the end of the line
//
// Digits are always numbers, so dup has to be written quoted as '2'.

use crate::data::Op;
use crate::error::{CoreError, Result};

pub fn parse_program(source: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    for (idx, line) in source.lines().enumerate() {
        for token in line.split_whitespace() {
            if token.starts_with('#') {
                break;
            }
            let byte = parse_token(token).map_err(|message| CoreError::Parse {
                line: idx + 1,
                message: message,
            })?;
            bytes.push(byte);
        }
    }
    Ok(bytes)
}

pub fn parse_byte(token: &str) -> std::result::Result<u8, String> {
    let parsed = match token.strip_prefix("0x").or(token.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => token.parse::<u8>(),
    };
    parsed.map_err(|e| format!("bad byte `{}`: {}", token, e))
}

fn parse_token(token: &str) -> std::result::Result<u8, String> {
    let chars: Vec<char> = token.chars().collect();
    match chars.as_slice() {
        ['\'', c, '\''] if c.is_ascii_graphic() => Ok(*c as u8),
        [c, ..] if c.is_ascii_digit() => parse_byte(token),
        [c] if c.is_ascii() && Op::is_operator(*c as u8) => Ok(*c as u8),
        _ => Err(format!("unrecognised token `{}`", token)),
    }
}

// Testing ////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod program_tests {
    use super::*;
    use crate::data;

    #[test]
    fn test_literals_and_operators() {
        let program = parse_program("42 58 + 'z'").unwrap();
        assert_eq!(program, vec![42, 58, data::ADD, data::SLEEP]);
    }

    #[test]
    fn test_hex_and_comments() {
        let source = "# multiply nothing\n0x88 0xF0 & # and\n\n0xff\n";
        assert_eq!(parse_program(source).unwrap(), vec![0x88, 0xf0, data::BITAND, 0xff]);
    }

    #[test]
    fn test_quoted_digit_is_dup() {
        assert_eq!(parse_program("12 '2' 2").unwrap(), vec![12, data::DUP, 2]);
    }

    #[test]
    fn test_quoted_comment_char() {
        assert_eq!(parse_program("'#' ,").unwrap(), vec![b'#', data::DELAY]);
    }

    #[test]
    fn test_errors_carry_line() {
        let err = parse_program("1 2\n3 k\n").unwrap_err();
        assert!(matches!(err, CoreError::Parse { line: 2, .. }));
        assert!(parse_program("256").is_err());
        assert!(parse_program("0xZZ").is_err());
    }

    #[test]
    fn test_parse_byte() {
        assert_eq!(parse_byte("0x7a"), Ok(0x7a));
        assert_eq!(parse_byte("200"), Ok(200));
        assert!(parse_byte("-1").is_err());
    }
}
