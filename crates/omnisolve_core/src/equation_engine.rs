use crate::autodiff::Dual;
use crate::traits::{DynamicalSystem, Scalar};
use anyhow::{anyhow, bail, Context, Result};
use std::cell::RefCell;
use std::collections::HashMap;

/// Name that resolves to the integration time when no variable or
/// parameter claims it.
pub const TIME_SYMBOL: &str = "t";

/// Built-in unary functions callable from expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Exp,
    Ln,
    Sqrt,
    Abs,
    Tanh,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "exp" => Function::Exp,
            "ln" | "log" => Function::Ln,
            "sqrt" => Function::Sqrt,
            "abs" => Function::Abs,
            "tanh" => Function::Tanh,
            _ => return None,
        })
    }

    fn apply<T: Scalar>(self, a: T) -> T {
        match self {
            Function::Sin => a.sin(),
            Function::Cos => a.cos(),
            Function::Tan => a.tan(),
            Function::Exp => a.exp(),
            Function::Ln => a.ln(),
            Function::Sqrt => a.sqrt(),
            Function::Abs => a.abs(),
            Function::Tanh => a.tanh(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Instructions for the stack machine. Binary ops pop `b` then `a` and push `a op b`.
#[derive(Debug, Clone, Copy)]
pub enum OpCode {
    LoadConst(f64),
    LoadVar(usize),
    LoadParam(usize),
    LoadTime,
    Binary(BinaryOp),
    Neg,
    Call(Function),
}

/// A compiled expression.
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

/// Stateless evaluator; the caller owns the stack buffer so repeated
/// evaluations do not allocate.
pub struct VM;

impl VM {
    pub fn execute<T: Scalar>(
        bytecode: &Bytecode,
        t: T,
        vars: &[T],
        params: &[T],
        stack: &mut Vec<T>,
    ) -> T {
        stack.clear();

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(T::lit(val)),
                OpCode::LoadVar(idx) => stack.push(vars[idx]),
                OpCode::LoadParam(idx) => stack.push(params[idx]),
                OpCode::LoadTime => stack.push(t),
                OpCode::Binary(op) => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(match op {
                        BinaryOp::Add => a + b,
                        BinaryOp::Sub => a - b,
                        BinaryOp::Mul => a * b,
                        BinaryOp::Div => a / b,
                        BinaryOp::Pow => a.powf(b),
                    });
                }
                OpCode::Neg => {
                    let a = pop(stack);
                    stack.push(-a);
                }
                OpCode::Call(func) => {
                    let a = pop(stack);
                    stack.push(func.apply(a));
                }
            }
        }

        pop(stack)
    }
}

// Compiled bytecode is always balanced; NaN marks a corrupted program.
fn pop<T: Scalar>(stack: &mut Vec<T>) -> T {
    stack.pop().unwrap_or_else(T::nan)
}

// --- AST & Compiler ---

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    Negate(Box<Expr>),
    Call(Function, Box<Expr>),
}

/// Resolves names to variable/parameter slots and emits bytecode.
pub struct Compiler {
    var_map: HashMap<String, usize>,
    param_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(var_names: &[String], param_names: &[String]) -> Self {
        let var_map = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let param_map = param_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { var_map, param_map }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode> {
        let mut ops = Vec::new();
        self.emit(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn emit(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<()> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                if let Some(&idx) = self.var_map.get(name) {
                    ops.push(OpCode::LoadVar(idx));
                } else if let Some(&idx) = self.param_map.get(name) {
                    ops.push(OpCode::LoadParam(idx));
                } else if name == TIME_SYMBOL {
                    ops.push(OpCode::LoadTime);
                } else {
                    bail!("Unknown variable or parameter: {}", name);
                }
            }
            Expr::Binary(left, op, right) => {
                self.emit(left, ops)?;
                self.emit(right, ops)?;
                ops.push(OpCode::Binary(*op));
            }
            Expr::Negate(operand) => {
                self.emit(operand, ops)?;
                ops.push(OpCode::Neg);
            }
            Expr::Call(func, arg) => {
                self.emit(arg, ops)?;
                ops.push(OpCode::Call(*func));
            }
        }
        Ok(())
    }
}

// --- Parser ---

/// Parses a string expression into an AST.
///
/// Grammar, lowest precedence first:
/// `sum := product (('+'|'-') product)*`,
/// `product := unary (('*'|'/') unary)*`,
/// `unary := '-' unary | power`,
/// `power := primary ('^' unary)?` (right associative).
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_sum()?;
    if let Some(token) = parser.peek() {
        bail!("Unexpected trailing token {:?} in '{}'", token, input);
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut literal = String::new();
            while let Some(&d) = chars.peek() {
                let exponent_sign =
                    (d == '+' || d == '-') && literal.ends_with(&['e', 'E'][..]);
                if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                    literal.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = literal
                .parse()
                .with_context(|| format!("Invalid number literal '{}'", literal))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            tokens.push(match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                other => bail!("Unexpected character '{}' in '{}'", other, input),
            });
            chars.next();
        }
    }
    Ok(tokens)
}

/// Deepest expression tree the parser will build. Nested parentheses, unary
/// minus, powers and operator chains all count toward it.
pub const MAX_DEPTH: usize = 256;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            bail!("Expression nests deeper than {} levels", MAX_DEPTH);
        }
        Ok(())
    }

    fn expect_rparen(&mut self) -> Result<()> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            other => Err(anyhow!("Expected ')', found {:?}", other)),
        }
    }

    fn parse_sum(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut left = self.parse_product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.consume();
            // Each link of a left-leaning chain adds a level to the tree.
            self.descend()?;
            let right = self.parse_product()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => break,
            };
            self.consume();
            self.descend()?;
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        self.descend()?;
        let expr = if let Some(Token::Minus) = self.peek() {
            self.consume();
            Expr::Negate(Box::new(self.parse_unary()?))
        } else {
            self.parse_power()?
        };
        self.depth -= 1;
        Ok(expr)
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), BinaryOp::Pow, Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    let func = Function::from_name(&name)
                        .ok_or_else(|| anyhow!("Unknown function: {}", name))?;
                    self.consume();
                    let arg = self.parse_sum()?;
                    self.expect_rparen()?;
                    Ok(Expr::Call(func, Box::new(arg)))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_sum()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            Some(token) => Err(anyhow!("Unexpected token {:?}", token)),
            None => Err(anyhow!("Unexpected end of expression")),
        }
    }
}

// --- ExpressionSystem ---

/// A set of compiled expressions sharing one variable and parameter layout.
/// Output `i` of `apply` is expression `i`.
#[derive(Debug)]
pub struct ExpressionSystem<T: Scalar> {
    pub equations: Vec<Bytecode>,
    pub params: Vec<T>,
    // Reused VM stack; makes the system !Sync.
    stack: RefCell<Vec<T>>,
}

impl<T: Scalar> ExpressionSystem<T> {
    pub fn new(equations: Vec<Bytecode>, params: Vec<T>) -> Self {
        Self {
            equations,
            params,
            stack: RefCell::new(Vec::with_capacity(64)),
        }
    }
}

impl ExpressionSystem<f64> {
    /// Parses and compiles `expressions` against the given variable names and
    /// named parameter values.
    pub fn compile(
        expressions: &[String],
        variables: &[String],
        parameters: &[(String, f64)],
    ) -> Result<Self> {
        if expressions.is_empty() {
            bail!("At least one expression is required.");
        }
        let param_names: Vec<String> = parameters.iter().map(|(n, _)| n.clone()).collect();
        let compiler = Compiler::new(variables, &param_names);
        let equations = expressions
            .iter()
            .map(|source| {
                parse(source)
                    .and_then(|expr| compiler.compile(&expr))
                    .with_context(|| format!("Failed to compile expression '{}'", source))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(
            equations,
            parameters.iter().map(|(_, v)| *v).collect(),
        ))
    }

    /// Same program evaluated over dual numbers, for derivatives.
    pub fn lift(&self) -> ExpressionSystem<Dual> {
        ExpressionSystem::new(
            self.equations.clone(),
            self.params.iter().map(|&p| Dual::constant(p)).collect(),
        )
    }
}

impl<T: Scalar> DynamicalSystem<T> for ExpressionSystem<T> {
    fn dimension(&self) -> usize {
        self.equations.len()
    }

    fn apply(&self, t: T, x: &[T], out: &mut [T]) {
        let mut stack = self.stack.borrow_mut();
        for (i, eq) in self.equations.iter().enumerate() {
            out[i] = VM::execute(eq, t, x, &self.params, &mut stack);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse, BinaryOp, Expr, ExpressionSystem};
    use crate::traits::DynamicalSystem;

    fn eval(source: &str, vars: &[(&str, f64)], t: f64) -> f64 {
        let names: Vec<String> = vars.iter().map(|(n, _)| n.to_string()).collect();
        let values: Vec<f64> = vars.iter().map(|(_, v)| *v).collect();
        let system = ExpressionSystem::compile(&[source.to_string()], &names, &[])
            .expect("expression should compile");
        let mut out = [0.0];
        system.apply(t, &values, &mut out);
        out[0]
    }

    fn assert_err_contains<T: std::fmt::Debug>(result: anyhow::Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err:#}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn precedence_binds_power_tighter_than_negation() {
        assert_eq!(eval("-2 ^ 2", &[], 0.0), -4.0);
        assert_eq!(eval("2 ^ 3 ^ 2", &[], 0.0), 512.0);
        assert_eq!(eval("1 + 2 * 3 - 4 / 2", &[], 0.0), 5.0);
        assert_eq!(eval("2 ^ -1", &[], 0.0), 0.5);
    }

    #[test]
    fn evaluates_variables_functions_and_time() {
        let value = eval("x * exp(0) + sqrt(y) - t", &[("x", 3.0), ("y", 16.0)], 1.5);
        assert!((value - 5.5).abs() < 1e-12);
        assert!((eval("1.5e2 + 2E-1", &[], 0.0) - 150.2).abs() < 1e-12);
    }

    #[test]
    fn parameters_resolve_after_variables() {
        let system = ExpressionSystem::compile(
            &["k * x".to_string()],
            &["x".to_string()],
            &[("k".to_string(), 4.0)],
        )
        .expect("expression should compile");
        let mut out = [0.0];
        system.apply(0.0, &[2.5], &mut out);
        assert_eq!(out[0], 10.0);
    }

    #[test]
    fn parse_builds_left_associative_sums() {
        let expr = parse("a - b - c").expect("should parse");
        match expr {
            Expr::Binary(left, BinaryOp::Sub, _) => {
                assert!(matches!(*left, Expr::Binary(_, BinaryOp::Sub, _)));
            }
            other => panic!("unexpected tree {other:?}"),
        }
    }

    #[test]
    fn malformed_input_is_reported() {
        assert_err_contains(
            ExpressionSystem::compile(&["x + z".to_string()], &["x".to_string()], &[]),
            "Unknown variable or parameter: z",
        );
        assert_err_contains(
            ExpressionSystem::compile(&["foo(x)".to_string()], &["x".to_string()], &[]),
            "Unknown function: foo",
        );
        assert_err_contains(parse("(x + 1"), "Expected ')'");
        assert_err_contains(parse("x $ 1"), "Unexpected character");
        assert_err_contains(parse("x 1"), "trailing token");
        assert_err_contains(ExpressionSystem::compile(&[], &[], &[]), "At least one");
    }

    #[test]
    fn runaway_nesting_is_an_error() {
        let nested = format!("{}x{}", "(".repeat(10_000), ")".repeat(10_000));
        assert_err_contains(parse(&nested), "nests deeper");
        assert_err_contains(parse(&format!("{}x", "-".repeat(10_000))), "nests deeper");
        assert_err_contains(parse(&vec!["x"; 10_000].join(" ^ ")), "nests deeper");
        assert_err_contains(parse(&vec!["x"; 10_000].join(" + ")), "nests deeper");

        let moderate = format!("{}x{}", "(".repeat(50), ")".repeat(50));
        assert!(parse(&moderate).is_ok());
        assert!(parse(&vec!["x"; 100].join(" * ")).is_ok());
    }
}
