use crate::tools::extract_string_arg;
use crate::traits::{Tool, ToolOutput};
use async_trait::async_trait;
use serde_json::json;

const MAX_DEPTH: usize = 256;

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression with + - * / ^, parentheses and decimals"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "expr": {
                    "type": "string",
                    "description": "Expression to evaluate, e.g. \"(2 + 3) * 4\""
                }
            },
            "required": ["expr"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolOutput> {
        let expr = extract_string_arg(&args, "expr")?;

        match evaluate(&expr) {
            Ok(value) => Ok(ToolOutput::success(format_number(value))),
            Err(e) => Ok(ToolOutput::error(format!("Cannot evaluate '{}': {}", expr, e))),
        }
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

pub fn evaluate(expr: &str) -> Result<f64, String> {
    let mut parser = Parser {
        chars: expr.chars().filter(|c| !c.is_whitespace()).collect(),
        pos: 0,
        depth: 0,
    };
    if parser.chars.is_empty() {
        return Err("empty expression".to_string());
    }

    let value = parser.expression()?;
    if let Some(c) = parser.peek() {
        return Err(format!("unexpected '{}' at position {}", c, parser.pos));
    }
    if !value.is_finite() {
        return Err("result is not a finite number".to_string());
    }
    Ok(value)
}

/// Recursive descent over `expr := term (('+'|'-') term)*`,
/// `term := power (('*'|'/') power)*`, `power := unary ('^' power)?`.
struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn expression(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.power()?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.pos += 1;
            let rhs = self.power()?;
            if op == '/' {
                if rhs == 0.0 {
                    return Err("division by zero".to_string());
                }
                value /= rhs;
            } else {
                value *= rhs;
            }
        }
        Ok(value)
    }

    fn power(&mut self) -> Result<f64, String> {
        let base = self.unary()?;
        if self.peek() == Some('^') {
            self.pos += 1;
            let exponent = self.nested(Self::power)?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    /// Runs one level of recursion, bounded at `MAX_DEPTH` so hostile input
    /// fails before the stack does.
    fn nested(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<f64, String>,
    ) -> Result<f64, String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err("expression nested too deeply".to_string());
        }
        let value = parse(self);
        self.depth -= 1;
        value
    }

    fn unary(&mut self) -> Result<f64, String> {
        self.nested(Self::signed)
    }

    fn signed(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some('+') => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let value = self.expression()?;
                match self.bump() {
                    Some(')') => Ok(value),
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| c.is_ascii_digit() || c == '.')
                {
                    self.pos += 1;
                }
                let literal: String = self.chars[start..self.pos].iter().collect();
                literal
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{}'", literal))
            }
            Some(c) => Err(format!("unexpected '{}' at position {}", c, self.pos)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}
