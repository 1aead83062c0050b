//! FILENAME: parser/src/parser.rs
//! PURPOSE: Recursive descent parser that converts a stream of Tokens into an AST.
//! CONTEXT: This is the second stage of the parsing pipeline. It takes tokens
//! from the Lexer and builds an Expression tree that can be evaluated.
//!
//! GRAMMAR (complete with sheet references and absolute markers):
//!   expression     --> comparison
//!   comparison     --> concatenation ( ("=" | "<>" | "<" | ">" | "<=" | ">=") concatenation )*
//!   concatenation  --> additive ( "&" additive )*
//!   additive       --> multiplicative ( ("+" | "-") multiplicative )*
//!   multiplicative --> unary ( ("*" | "/") unary )*
//!   unary          --> "-" unary | power
//!   power          --> primary ( "^" unary )?
//!   primary        --> NUMBER | STRING | BOOLEAN | reference | function_call | "(" expression ")"
//!   reference      --> [sheet_prefix] cell_ref (":" cell_ref)?
//!   sheet_prefix   --> (IDENTIFIER | QUOTED_IDENTIFIER) "!"
//!   cell_ref       --> "$"? COLUMN "$"? ROW
//!   function_call  --> IDENTIFIER "(" arguments? ")"
//!   arguments      --> expression ("," expression)*

use crate::ast::{BinaryOperator, BuiltinFunction, Expression, UnaryOperator, Value};
use crate::lexer::Lexer;
use crate::token::Token;

/// Parser errors with descriptive messages.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        ParseError {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

pub type ParseResult<T> = Result<T, ParseError>;

/// The Parser struct holds the lexer and current token state.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current_token: Token,
}

impl<'a> Parser<'a> {
    /// Creates a new parser from an input string.
    /// Automatically advances to the first token.
    pub fn new(input: &'a str) -> Self {
        let mut lexer = Lexer::new(input);
        let current_token = lexer.next_token();
        Parser {
            lexer,
            current_token,
        }
    }

    /// Parses the entire input and returns the AST.
    /// Handles the optional leading '=' that indicates a formula.
    pub fn parse(&mut self) -> ParseResult<Expression> {
        // Skip the leading '=' if present (formula indicator)
        if self.current_token == Token::Equals {
            self.advance();
        }

        // Handle empty formula
        if self.current_token == Token::EOF {
            return Err(ParseError::new("Empty expression"));
        }

        let expr = self.parse_expression()?;

        // Ensure we consumed all tokens
        if self.current_token != Token::EOF {
            return Err(ParseError::new(format!(
                "Unexpected token after expression: {:?}",
                self.current_token
            )));
        }

        Ok(expr)
    }

    /// Advances to the next token.
    fn advance(&mut self) {
        self.current_token = self.lexer.next_token();
    }

    /// Checks if the current token matches the expected token.
    /// If it matches, advances and returns Ok. Otherwise returns an error.
    fn expect(&mut self, expected: Token) -> ParseResult<()> {
        if self.current_token == expected {
            self.advance();
            Ok(())
        } else {
            Err(ParseError::new(format!(
                "Expected {:?}, found {:?}",
                expected, self.current_token
            )))
        }
    }

    /// Entry point for expression parsing.
    fn parse_expression(&mut self) -> ParseResult<Expression> {
        self.parse_comparison()
    }

    /// Parses comparison expressions (=, <>, <, >, <=, >=).
    fn parse_comparison(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_concatenation()?;

        loop {
            let op = match &self.current_token {
                Token::Equals => BinaryOperator::Equal,
                Token::NotEqual => BinaryOperator::NotEqual,
                Token::LessThan => BinaryOperator::LessThan,
                Token::GreaterThan => BinaryOperator::GreaterThan,
                Token::LessEqual => BinaryOperator::LessEqual,
                Token::GreaterEqual => BinaryOperator::GreaterEqual,
                _ => break,
            };

            self.advance();
            let right = self.parse_concatenation()?;

            left = Expression::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Parses concatenation expressions (&).
    fn parse_concatenation(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_additive()?;

        while self.current_token == Token::Ampersand {
            self.advance();
            let right = self.parse_additive()?;

            left = Expression::BinaryOp {
                left: Box::new(left),
                op: BinaryOperator::Concat,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Parses additive expressions (+ and -).
    fn parse_additive(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match &self.current_token {
                Token::Plus => BinaryOperator::Add,
                Token::Minus => BinaryOperator::Subtract,
                _ => break,
            };

            self.advance();
            let right = self.parse_multiplicative()?;

            left = Expression::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Parses multiplicative expressions (* and /).
    fn parse_multiplicative(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_power()?;

        loop {
            let op = match &self.current_token {
                Token::Asterisk => BinaryOperator::Multiply,
                Token::Slash => BinaryOperator::Divide,
                _ => break,
            };

            self.advance();
            let right = self.parse_power()?;

            left = Expression::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Parses power/exponentiation expressions (^), right-associative.
    /// Unary negation binds tighter than `^` on the left operand — `-2^2`
    /// parses as `(-2)^2` — since the left side is itself parsed as a
    /// unary expression. The right operand recurses back into this same
    /// level so `2^-2` still parses its negation and `2^3^2` associates as
    /// `2^(3^2)`.
    fn parse_power(&mut self) -> ParseResult<Expression> {
        let left = self.parse_unary()?;

        if self.current_token == Token::Caret {
            self.advance();
            let right = self.parse_power()?;

            return Ok(Expression::BinaryOp {
                left: Box::new(left),
                op: BinaryOperator::Power,
                right: Box::new(right),
            });
        }

        Ok(left)
    }

    /// Parses unary expressions (negation).
    fn parse_unary(&mut self) -> ParseResult<Expression> {
        if self.current_token == Token::Minus {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expression::UnaryOp {
                op: UnaryOperator::Negate,
                operand: Box::new(operand),
            });
        }

        self.parse_primary()
    }

    /// Parses primary expressions (literals, cell refs, function calls, parentheses).
    fn parse_primary(&mut self) -> ParseResult<Expression> {
        match self.current_token.clone() {
            // Dollar sign - start of absolute reference like $A1
            Token::Dollar => {
                self.advance();
                self.parse_absolute_reference(None)
            }

            // Number literal
            Token::Number(n) => {
                self.advance();
                Ok(Expression::Literal(Value::Number(n)))
            }

            // String literal
            Token::String(s) => {
                self.advance();
                Ok(Expression::Literal(Value::String(s)))
            }

            // Boolean literal
            Token::Boolean(b) => {
                self.advance();
                Ok(Expression::Literal(Value::Boolean(b)))
            }

            // Quoted identifier - must be a sheet reference
            Token::QuotedIdentifier(sheet_name) => {
                self.advance();
                self.expect(Token::Exclamation)?;
                self.parse_sheet_reference(sheet_name)
            }

            // Identifier: could be a cell reference, range, function call,
            // or sheet reference prefix.
            Token::Identifier(name) => {
                self.advance();

                // Check if it's a sheet reference (followed by '!')
                if self.current_token == Token::Exclamation {
                    self.advance();
                    return self.parse_sheet_reference(name);
                }

                // Check if it's a function call (followed by '(')
                if self.current_token == Token::LParen {
                    return self.parse_function_call(name);
                }

                // Anything else must look like a cell reference (letters
                // followed by digits, e.g. A1, AA100); there are no
                // defined names or whole-column/row references in this
                // grammar.
                if !Self::is_valid_cell_ref_identifier(&name) {
                    return Err(ParseError::new(format!(
                        "Unrecognized identifier: {}",
                        name
                    )));
                }

                // Handle column-only identifier followed by $ (absolute row
                // marker): the lexer splits D$2 into Identifier("D"),
                // Dollar, Number(2) because $ stops identifier scanning.
                let is_col_only = name.chars().all(|c| c.is_ascii_alphabetic());
                if is_col_only && self.current_token == Token::Dollar {
                    self.advance(); // consume $
                    if let Token::Number(n) = self.current_token.clone() {
                        self.advance();
                        let row = n as u32;
                        if row == 0 {
                            return Err(ParseError::new("Row number must be >= 1"));
                        }
                        if self.current_token == Token::Colon {
                            return self.parse_range_continuation(None, name, row, false, true);
                        }
                        return Ok(Expression::CellRef {
                            sheet: None,
                            col: name.to_uppercase(),
                            row,
                            col_absolute: false,
                            row_absolute: true,
                        });
                    }
                    return Err(ParseError::new(format!(
                        "Expected row number after $, found {:?}",
                        self.current_token
                    )));
                }

                if is_col_only {
                    return Err(ParseError::new(format!(
                        "Cell reference missing row: {}",
                        name
                    )));
                }

                let (col, row) = self.split_cell_reference(&name)?;
                if self.current_token == Token::Colon {
                    return self.parse_range_continuation(None, col, row, false, false);
                }
                Ok(Expression::CellRef {
                    sheet: None,
                    col,
                    row,
                    col_absolute: false,
                    row_absolute: false,
                })
            }

            // Parenthesized expression
            Token::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }

            // Error cases
            Token::EOF => Err(ParseError::new("Unexpected end of expression")),

            Token::Illegal(ch) => Err(ParseError::new(format!("Illegal character: {}", ch))),

            token => Err(ParseError::new(format!("Unexpected token: {:?}", token))),
        }
    }

    /// Parses a reference that starts with $ (absolute marker).
    fn parse_absolute_reference(&mut self, sheet: Option<String>) -> ParseResult<Expression> {
        match self.current_token.clone() {
            Token::Identifier(name) => {
                self.advance();

                let is_col_only = name.chars().all(|c| c.is_ascii_alphabetic());

                if is_col_only {
                    if self.current_token == Token::Dollar {
                        self.advance();
                        if let Token::Number(row) = self.current_token.clone() {
                            self.advance();
                            let row = row as u32;
                            if row == 0 {
                                return Err(ParseError::new("Row number must be >= 1"));
                            }
                            if self.current_token == Token::Colon {
                                return self.parse_range_continuation(
                                    sheet, name, row, true, true,
                                );
                            }
                            return Ok(Expression::CellRef {
                                sheet,
                                col: name.to_uppercase(),
                                row,
                                col_absolute: true,
                                row_absolute: true,
                            });
                        }
                        return Err(ParseError::new("Expected row number after $"));
                    }
                    return Err(ParseError::new(format!(
                        "Expected row number after ${}",
                        name
                    )));
                }

                // Has digits, so it's like $A1 (col absolute, row not)
                let (col, row) = self.split_cell_reference(&name)?;
                if self.current_token == Token::Colon {
                    return self.parse_range_continuation(sheet, col, row, true, false);
                }
                Ok(Expression::CellRef {
                    sheet,
                    col,
                    row,
                    col_absolute: true,
                    row_absolute: false,
                })
            }

            _ => Err(ParseError::new(format!(
                "Expected identifier after $, found {:?}",
                self.current_token
            ))),
        }
    }

    /// Parses a reference after a sheet prefix (SheetName!).
    fn parse_sheet_reference(&mut self, sheet_name: String) -> ParseResult<Expression> {
        match self.current_token.clone() {
            Token::Dollar => {
                self.advance();
                self.parse_absolute_reference(Some(sheet_name))
            }

            Token::Identifier(name) => {
                self.advance();

                let is_col_only = name.chars().all(|c| c.is_ascii_alphabetic());
                if is_col_only && self.current_token == Token::Dollar {
                    self.advance(); // consume $
                    if let Token::Number(n) = self.current_token.clone() {
                        self.advance();
                        let row = n as u32;
                        if row == 0 {
                            return Err(ParseError::new("Row number must be >= 1"));
                        }
                        if self.current_token == Token::Colon {
                            return self.parse_range_continuation(
                                Some(sheet_name),
                                name,
                                row,
                                false,
                                true,
                            );
                        }
                        return Ok(Expression::CellRef {
                            sheet: Some(sheet_name),
                            col: name.to_uppercase(),
                            row,
                            col_absolute: false,
                            row_absolute: true,
                        });
                    }
                    return Err(ParseError::new(format!(
                        "Expected row number after $, found {:?}",
                        self.current_token
                    )));
                }

                if !Self::is_valid_cell_ref_identifier(&name) || is_col_only {
                    return Err(ParseError::new(format!(
                        "Unrecognized cell reference after '!': {}",
                        name
                    )));
                }

                let (col, row) = self.split_cell_reference(&name)?;
                if self.current_token == Token::Colon {
                    return self.parse_range_continuation(Some(sheet_name), col, row, false, false);
                }
                Ok(Expression::CellRef {
                    sheet: Some(sheet_name),
                    col,
                    row,
                    col_absolute: false,
                    row_absolute: false,
                })
            }

            _ => Err(ParseError::new(format!(
                "Expected cell reference after '!', found {:?}",
                self.current_token
            ))),
        }
    }

    /// Parses the end of a range after seeing "cell_ref :".
    fn parse_range_continuation(
        &mut self,
        sheet: Option<String>,
        start_col: String,
        start_row: u32,
        start_col_absolute: bool,
        start_row_absolute: bool,
    ) -> ParseResult<Expression> {
        // Consume the ':'
        self.advance();

        let end_col_absolute = if self.current_token == Token::Dollar {
            self.advance();
            true
        } else {
            false
        };

        let end_identifier = match self.current_token.clone() {
            Token::Identifier(name) => {
                self.advance();
                name
            }
            _ => return Err(ParseError::new("Expected cell reference after ':'")),
        };

        let end_row_absolute = if self.current_token == Token::Dollar {
            self.advance();
            true
        } else {
            false
        };

        let (end_col, end_row) = if end_row_absolute {
            if let Token::Number(n) = self.current_token.clone() {
                self.advance();
                (end_identifier.to_uppercase(), n as u32)
            } else {
                return Err(ParseError::new("Expected row number after $"));
            }
        } else {
            self.split_cell_reference(&end_identifier)?
        };

        Ok(Expression::Range {
            sheet,
            start: Box::new(Expression::CellRef {
                sheet: None,
                col: start_col.to_uppercase(),
                row: start_row,
                col_absolute: start_col_absolute,
                row_absolute: start_row_absolute,
            }),
            end: Box::new(Expression::CellRef {
                sheet: None,
                col: end_col,
                row: end_row,
                col_absolute: end_col_absolute,
                row_absolute: end_row_absolute,
            }),
        })
    }

    /// Parses a function call like SUM(A1, A2, 10).
    /// Resolves the function name to a BuiltinFunction enum at parse time.
    fn parse_function_call(&mut self, name: String) -> ParseResult<Expression> {
        let func = BuiltinFunction::from_name(&name);

        self.advance(); // consume '('

        let mut args = Vec::new();

        if self.current_token == Token::RParen {
            self.advance();
            return Ok(Expression::FunctionCall { func, args });
        }

        args.push(self.parse_expression()?);

        while self.current_token == Token::Comma {
            self.advance();
            args.push(self.parse_expression()?);
        }

        self.expect(Token::RParen)?;

        Ok(Expression::FunctionCall { func, args })
    }

    /// Checks whether an identifier could be a cell reference.
    /// Returns false for names with non-alphanumeric characters, letters
    /// after digits, or a column part beyond XFD (16384).
    fn is_valid_cell_ref_identifier(name: &str) -> bool {
        if !name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return false;
        }

        let col_part: String = name.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
        let rest: &str = &name[col_part.len()..];

        if col_part.is_empty() {
            return false;
        }

        if !rest.is_empty() && !rest.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }

        let col_num = Self::col_letters_to_number(&col_part);
        if col_num > 16384 {
            return false;
        }

        if rest.is_empty() {
            return true;
        }

        if let Ok(row) = rest.parse::<u32>() {
            row >= 1 && row <= 1_048_576
        } else {
            false
        }
    }

    /// Converts column letters to a 1-based column number.
    /// A=1, B=2, ..., Z=26, AA=27, ..., XFD=16384.
    fn col_letters_to_number(letters: &str) -> u32 {
        let mut result: u32 = 0;
        for ch in letters.chars() {
            let val = (ch.to_ascii_uppercase() as u32) - ('A' as u32) + 1;
            result = match result.checked_mul(26).and_then(|r| r.checked_add(val)) {
                Some(r) => r,
                None => return u32::MAX,
            };
        }
        result
    }

    /// Splits a cell reference string like "A1" or "AA100" into column and row parts.
    fn split_cell_reference(&self, identifier: &str) -> ParseResult<(String, u32)> {
        let mut col = String::new();
        let mut row_str = String::new();

        for ch in identifier.chars() {
            if ch.is_ascii_alphabetic() {
                if !row_str.is_empty() {
                    return Err(ParseError::new(format!(
                        "Invalid cell reference: {}",
                        identifier
                    )));
                }
                col.push(ch);
            } else if ch.is_ascii_digit() {
                row_str.push(ch);
            } else {
                return Err(ParseError::new(format!(
                    "Invalid character in cell reference: {}",
                    ch
                )));
            }
        }

        if col.is_empty() {
            return Err(ParseError::new(format!(
                "Cell reference missing column: {}",
                identifier
            )));
        }

        if row_str.is_empty() {
            return Err(ParseError::new(format!(
                "Cell reference missing row: {}",
                identifier
            )));
        }

        let row: u32 = row_str.parse().map_err(|_| {
            ParseError::new(format!(
                "Invalid row number in cell reference: {}",
                identifier
            ))
        })?;

        if row == 0 {
            return Err(ParseError::new(format!(
                "Row number must be >= 1: {}",
                identifier
            )));
        }

        Ok((col.to_uppercase(), row))
    }
}

/// Convenience function to parse a formula string directly.
pub fn parse(input: &str) -> ParseResult<Expression> {
    let mut parser = Parser::new(input);
    parser.parse()
}
