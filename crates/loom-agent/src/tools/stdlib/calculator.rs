//! Arithmetic expression evaluator backing the `calculator` tool.
//!
//! Grammar: `expr = term (('+' | '-') term)*`, `term = power (('*' | '/' | '%') power)*`,
//! `power = unary ('^' power)?`, `unary = '-' unary | primary`,
//! `primary = number | '(' expr ')'`. `**` is accepted as `^`.

use std::sync::Arc;

use serde_json::json;

use crate::tools::tool::{AgentTool, ToolCall, ToolDescriptor, ToolResponse};

pub const CALCULATOR_TOOL_NAME: &str = "calculator";

/// Nesting allowed across parentheses, unary signs and exponent chains.
pub const MAX_NESTING_DEPTH: usize = 256;

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum CalculatorError {
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is not a finite number")]
    NotFinite,
    #[error("expression nests deeper than {0} levels")]
    TooDeep(usize),
}

struct Parser {
    chars: Vec<char>,
    position: usize,
    depth: usize,
}

impl Parser {
    fn new(expression: &str) -> Self {
        Self {
            chars: expression.chars().filter(|ch| !ch.is_whitespace()).collect(),
            position: 0,
            depth: 0,
        }
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, CalculatorError>,
    ) -> Result<T, CalculatorError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(CalculatorError::TooDeep(MAX_NESTING_DEPTH));
        }
        self.depth += 1;
        let parsed = parse(self);
        self.depth -= 1;
        parsed
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn eat_power(&mut self) -> bool {
        if self.eat('^') {
            return true;
        }
        if self.peek() == Some('*') && self.chars.get(self.position + 1) == Some(&'*') {
            self.position += 2;
            return true;
        }
        false
    }

    fn expression(&mut self) -> Result<f64, CalculatorError> {
        let mut value = self.term()?;
        loop {
            if self.eat('+') {
                value += self.term()?;
            } else if self.eat('-') {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn term(&mut self) -> Result<f64, CalculatorError> {
        let mut value = self.power()?;
        loop {
            if self.peek() == Some('*') && self.chars.get(self.position + 1) != Some(&'*') {
                self.position += 1;
                value *= self.power()?;
            } else if self.eat('/') {
                let divisor = self.power()?;
                if divisor == 0.0 {
                    return Err(CalculatorError::DivisionByZero);
                }
                value /= divisor;
            } else if self.eat('%') {
                let divisor = self.power()?;
                if divisor == 0.0 {
                    return Err(CalculatorError::DivisionByZero);
                }
                value %= divisor;
            } else {
                return Ok(value);
            }
        }
    }

    fn power(&mut self) -> Result<f64, CalculatorError> {
        let base = self.unary()?;
        if self.eat_power() {
            let exponent = self.nested(Self::power)?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<f64, CalculatorError> {
        if self.eat('-') {
            return Ok(-self.nested(Self::unary)?);
        }
        if self.eat('+') {
            return self.nested(Self::unary);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<f64, CalculatorError> {
        match self.peek() {
            Some('(') => {
                self.position += 1;
                let value = self.nested(Self::expression)?;
                if !self.eat(')') {
                    return match self.peek() {
                        Some(ch) => Err(CalculatorError::UnexpectedChar(ch, self.position)),
                        None => Err(CalculatorError::UnexpectedEnd),
                    };
                }
                Ok(value)
            }
            Some(ch) if ch.is_ascii_digit() || ch == '.' => self.number(),
            Some(ch) => Err(CalculatorError::UnexpectedChar(ch, self.position)),
            None => Err(CalculatorError::UnexpectedEnd),
        }
    }

    fn number(&mut self) -> Result<f64, CalculatorError> {
        let start = self.position;
        while self
            .peek()
            .is_some_and(|ch| ch.is_ascii_digit() || ch == '.')
        {
            self.position += 1;
        }
        let literal: String = self.chars[start..self.position].iter().collect();
        literal
            .parse::<f64>()
            .map_err(|_| CalculatorError::UnexpectedChar(self.chars[start], start))
    }
}

pub fn evaluate(expression: &str) -> Result<f64, CalculatorError> {
    let mut parser = Parser::new(expression);
    let value = parser.expression()?;
    if let Some(ch) = parser.peek() {
        return Err(CalculatorError::UnexpectedChar(ch, parser.position));
    }
    if !value.is_finite() {
        return Err(CalculatorError::NotFinite);
    }
    Ok(value)
}

pub fn calculator_tool() -> AgentTool {
    AgentTool::new(
        ToolDescriptor::new(
            CALCULATOR_TOOL_NAME,
            "Performs arithmetic calculations.",
            json!({
                "type": "object",
                "properties": {
                    "expression": {
                        "type": "string",
                        "description": "The expression to evaluate. Example: 2 + 3 - 1"
                    }
                },
                "required": ["expression"]
            }),
        ),
        Arc::new(|call: ToolCall| {
            Box::pin(async move {
                let expression = call
                    .input
                    .get("expression")
                    .and_then(|value| value.as_str())
                    .unwrap_or_default();
                match evaluate(expression) {
                    Ok(value) => ToolResponse::resolution(json!({
                        "expression": expression,
                        "result": value,
                    }))
                    .encode(),
                    Err(error) => ToolResponse::rejection(
                        json!({"expression": expression, "error": error.to_string()}),
                        "error",
                    )
                    .encode(),
                }
            })
        }),
    )
}
