// Query language AST and canonical printer

use std::fmt;

/// Binary operators, lowest binding to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Or => "or",
            Self::And => "and",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Pow => "^",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// A parsed query expression.
///
/// Parameters (`{name}`) are ordinary nodes: binding substitutes them on the
/// AST, never on source text. `Prop` holds an accessor path (`.a."b c"`);
/// an empty path is the identity accessor, printed `get()`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Prop(Vec<String>),
    Param(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Always two or more stages.
    Pipe(Vec<Expr>),
    Call(String, Vec<Expr>),
}

fn is_bare_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !matches!(s, "and" | "or" | "not" | "in" | "true" | "false" | "null")
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    // serde_json produces the exact escaping our lexer understands
    match serde_json::to_string(s) {
        Ok(quoted) => f.write_str(&quoted),
        Err(_) => write!(f, "\"{}\"", s),
    }
}

fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{}", n)
    }
}

/// Canonical text form. Compound sub-expressions are parenthesized, so
/// `parse(print(ast)) == ast` for every expression the parser accepts.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Null => f.write_str("null"),
            Expr::Bool(b) => write!(f, "{}", b),
            Expr::Number(n) => write_number(f, *n),
            Expr::Str(s) => write_quoted(f, s),
            Expr::Prop(path) => {
                if path.is_empty() {
                    return f.write_str("get()");
                }
                for segment in path {
                    f.write_str(".")?;
                    if is_bare_ident(segment) {
                        f.write_str(segment)?;
                    } else {
                        write_quoted(f, segment)?;
                    }
                }
                Ok(())
            }
            Expr::Param(name) => write!(f, "{{{}}}", name),
            Expr::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Expr::Object(pairs) => {
                f.write_str("{")?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    if is_bare_ident(key) {
                        f.write_str(key)?;
                    } else {
                        write_quoted(f, key)?;
                    }
                    write!(f, ": {}", value)?;
                }
                f.write_str("}")
            }
            Expr::Unary(UnaryOp::Neg, inner) => write!(f, "-({})", inner),
            Expr::Unary(UnaryOp::Not, inner) => write!(f, "not ({})", inner),
            Expr::Binary(op, left, right) => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Expr::Pipe(stages) => {
                f.write_str("(")?;
                for (i, stage) in stages.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{}", stage)?;
                }
                f.write_str(")")
            }
            Expr::Call(name, args) => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
        }
    }
}

impl Expr {
    /// Collect the names of every `{param}` placeholder in the tree.
    pub fn param_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_params(&mut names);
        names
    }

    fn collect_params(&self, out: &mut Vec<String>) {
        match self {
            Expr::Param(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Expr::Array(items) | Expr::Pipe(items) | Expr::Call(_, items) => {
                for item in items {
                    item.collect_params(out);
                }
            }
            Expr::Object(pairs) => {
                for (_, value) in pairs {
                    value.collect_params(out);
                }
            }
            Expr::Unary(_, inner) => inner.collect_params(out),
            Expr::Binary(_, left, right) => {
                left.collect_params(out);
                right.collect_params(out);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_accessor_paths() {
        let e = Expr::Prop(vec!["OrderTotal".into(), "Amount".into()]);
        assert_eq!(e.to_string(), ".OrderTotal.Amount");
    }

    #[test]
    fn prints_quoted_segments() {
        let e = Expr::Prop(vec!["a b".into()]);
        assert_eq!(e.to_string(), ".\"a b\"");
    }

    #[test]
    fn prints_identity_as_get() {
        assert_eq!(Expr::Prop(vec![]).to_string(), "get()");
    }

    #[test]
    fn prints_param_placeholder() {
        assert_eq!(Expr::Param("threshold".into()).to_string(), "{threshold}");
    }

    #[test]
    fn prints_binary_parenthesized() {
        let e = Expr::Binary(
            BinaryOp::Gt,
            Box::new(Expr::Prop(vec!["age".into()])),
            Box::new(Expr::Number(18.0)),
        );
        assert_eq!(e.to_string(), "(.age > 18)");
    }

    #[test]
    fn integral_numbers_print_without_fraction() {
        assert_eq!(Expr::Number(5.0).to_string(), "5");
        assert_eq!(Expr::Number(2.5).to_string(), "2.5");
        assert_eq!(Expr::Number(-3.0).to_string(), "-3");
    }
}
