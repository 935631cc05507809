//! Parser for the flow filter expression DSL.
//!
//! The surface syntax is a small boolean language over flow attributes:
//!
//! ```text
//! proto tcp and not (src port <1024 or dst port 443)
//! bytes >1048576
//! tid 65001 or inlist
//! ```
//!
//! `and` binds tighter than `or`; `not` and parentheses work as expected.
//! An empty expression matches every flow.

use std::net::IpAddr;

/// Syntax or semantic error in a filter expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("filter expression error: {0}")]
pub struct ParseError(pub String);

/// Which address/port of the flow a match applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Either,
    Src,
    Dst,
}

/// Which interface of the flow a match applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfaceDirection {
    Either,
    In,
    Out,
}

/// Numeric comparison: `80`, `<1024`, `>1048576`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumMatch {
    Eq(u64),
    Lt(u64),
    Gt(u64),
}

impl NumMatch {
    pub fn matches(&self, value: u64) -> bool {
        match self {
            NumMatch::Eq(n) => value == *n,
            NumMatch::Lt(n) => value < *n,
            NumMatch::Gt(n) => value > *n,
        }
    }
}

/// Parsed filter expression tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    /// Empty filter: matches everything.
    Any,
    Or(Box<Expression>, Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
    Proto(u8),
    Port {
        direction: Direction,
        num: NumMatch,
    },
    Bytes(NumMatch),
    Packets(NumMatch),
    Address {
        direction: Direction,
        addr: IpAddr,
    },
    Iface {
        direction: IfaceDirection,
        num: NumMatch,
    },
    Cid(NumMatch),
    Tid(NumMatch),
    Inlist,
    Normalized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Number(u64),
    Lt,
    Gt,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '<' => {
                chars.next();
                tokens.push(Token::Lt);
            }
            '>' => {
                chars.next();
                tokens.push(Token::Gt);
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '<' | '>') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                if word.chars().all(|c| c.is_ascii_digit()) {
                    let number = word
                        .parse()
                        .map_err(|_| ParseError(format!("number `{word}` out of range")))?;
                    tokens.push(Token::Number(number));
                } else {
                    tokens.push(Token::Word(word.to_ascii_lowercase()));
                }
            }
        }
    }
    Ok(tokens)
}

/// Parse a filter expression. The empty string yields [`Expression::Any`].
pub fn parse(input: &str) -> Result<Expression, ParseError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Ok(Expression::Any);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expression = parser.or_expression()?;
    match parser.peek() {
        None => Ok(expression),
        Some(token) => Err(ParseError(format!("unexpected trailing `{token:?}`"))),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token::Word(w)) if w == word) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn or_expression(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.and_expression()?;
        while self.eat_word("or") {
            let right = self.and_expression()?;
            left = Expression::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expression(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.unary_expression()?;
        while self.eat_word("and") {
            let right = self.unary_expression()?;
            left = Expression::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary_expression(&mut self) -> Result<Expression, ParseError> {
        if self.eat_word("not") {
            let inner = self.unary_expression()?;
            return Ok(Expression::Not(Box::new(inner)));
        }
        if matches!(self.peek(), Some(Token::LParen)) {
            self.pos += 1;
            let inner = self.or_expression()?;
            match self.next() {
                Some(Token::RParen) => return Ok(inner),
                _ => return Err(ParseError("missing closing parenthesis".into())),
            }
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expression, ParseError> {
        let word = match self.next() {
            Some(Token::Word(word)) => word,
            Some(token) => return Err(ParseError(format!("unexpected `{token:?}`"))),
            None => return Err(ParseError("unexpected end of expression".into())),
        };
        match word.as_str() {
            "src" | "dst" => {
                let direction = if word == "src" {
                    Direction::Src
                } else {
                    Direction::Dst
                };
                match self.next() {
                    Some(Token::Word(key)) if key == "port" => Ok(Expression::Port {
                        direction,
                        num: self.num_match("port")?,
                    }),
                    Some(Token::Word(key)) if key == "address" => Ok(Expression::Address {
                        direction,
                        addr: self.address()?,
                    }),
                    _ => Err(ParseError(format!(
                        "`{word}` must be followed by `port` or `address`"
                    ))),
                }
            }
            "proto" => self.proto(),
            "port" => Ok(Expression::Port {
                direction: Direction::Either,
                num: self.num_match("port")?,
            }),
            "address" => Ok(Expression::Address {
                direction: Direction::Either,
                addr: self.address()?,
            }),
            "bytes" => Ok(Expression::Bytes(self.num_match("bytes")?)),
            "packets" => Ok(Expression::Packets(self.num_match("packets")?)),
            "iface" => self.iface(),
            "cid" => Ok(Expression::Cid(self.num_match("cid")?)),
            "tid" => Ok(Expression::Tid(self.num_match("tid")?)),
            "inlist" => Ok(Expression::Inlist),
            "normalized" => Ok(Expression::Normalized),
            other => Err(ParseError(format!("unknown filter key `{other}`"))),
        }
    }

    fn proto(&mut self) -> Result<Expression, ParseError> {
        match self.next() {
            Some(Token::Number(number)) => {
                let proto = u8::try_from(number)
                    .map_err(|_| ParseError(format!("protocol number {number} out of range")))?;
                Ok(Expression::Proto(proto))
            }
            Some(Token::Word(name)) => match name.as_str() {
                "icmp" => Ok(Expression::Proto(1)),
                "tcp" => Ok(Expression::Proto(6)),
                "udp" => Ok(Expression::Proto(17)),
                "gre" => Ok(Expression::Proto(47)),
                "esp" => Ok(Expression::Proto(50)),
                "icmp6" | "icmpv6" => Ok(Expression::Proto(58)),
                other => Err(ParseError(format!("unknown protocol name `{other}`"))),
            },
            _ => Err(ParseError("`proto` needs a name or number".into())),
        }
    }

    fn iface(&mut self) -> Result<Expression, ParseError> {
        let direction = if self.eat_word("in") {
            IfaceDirection::In
        } else if self.eat_word("out") {
            IfaceDirection::Out
        } else {
            IfaceDirection::Either
        };
        Ok(Expression::Iface {
            direction,
            num: self.num_match("iface")?,
        })
    }

    fn num_match(&mut self, key: &str) -> Result<NumMatch, ParseError> {
        match self.next() {
            Some(Token::Number(number)) => Ok(NumMatch::Eq(number)),
            Some(Token::Lt) => match self.next() {
                Some(Token::Number(number)) => Ok(NumMatch::Lt(number)),
                _ => Err(ParseError(format!("`{key} <` needs a number"))),
            },
            Some(Token::Gt) => match self.next() {
                Some(Token::Number(number)) => Ok(NumMatch::Gt(number)),
                _ => Err(ParseError(format!("`{key} >` needs a number"))),
            },
            _ => Err(ParseError(format!("`{key}` needs a number"))),
        }
    }

    fn address(&mut self) -> Result<IpAddr, ParseError> {
        match self.next() {
            Some(Token::Word(word)) => word
                .parse()
                .map_err(|_| ParseError(format!("`{word}` is not an IP address"))),
            _ => Err(ParseError("`address` needs an IP address".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_proto_names_and_numbers() {
        assert_eq!(parse("proto tcp").expect("tcp"), Expression::Proto(6));
        assert_eq!(parse("proto 4").expect("number"), Expression::Proto(4));
    }

    #[test]
    fn parses_comparators_and_precedence() {
        let expression = parse("proto tcp and port <1024 or inlist").expect("parse");
        // `and` binds tighter than `or`.
        match expression {
            Expression::Or(left, right) => {
                assert!(matches!(*left, Expression::And(_, _)));
                assert_eq!(*right, Expression::Inlist);
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn empty_expression_matches_all() {
        assert_eq!(parse("  ").expect("empty"), Expression::Any);
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(parse("protoo 4").is_err());
        assert!(parse("port tcp").is_err());
        assert!(parse("(proto tcp").is_err());
    }
}
