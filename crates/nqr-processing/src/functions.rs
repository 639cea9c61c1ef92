//! Parametrized functions of one variable used as apodization windows
//!
//! Built-in shapes are evaluated natively. User expressions are compiled
//! with `evalexpr`, with `x` and every parameter symbol bound as floats.

use evalexpr::{
    build_operator_tree, ContextWithMutableFunctions, ContextWithMutableVariables,
    Function as ExprFunction, HashMapContext, Node, Value,
};
use nqr_core::{NqrError, NqrResult};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Shape of a window function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FunctionKind {
    /// `exp(-x / T2star)`
    Fid,
    /// `1 / (1 + (x / T2star)^2)`
    Lorentzian,
    /// `exp(-0.5 * ((x - mu) / sigma)^2)`
    Gaussian,
    /// Constant 1
    Rect,
    /// `sin(x * l) / (x * l)`
    Sinc,
    /// User supplied expression
    Custom { expression: String },
}

/// Named numeric parameter of a function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionParameter {
    /// Label shown to the operator
    pub name: String,
    /// Symbol used in the expression
    pub symbol: String,
    /// Current value
    pub value: f64,
    /// Value restored by [`Function::reset_parameters`]
    pub default: f64,
}

impl FunctionParameter {
    pub fn new(name: &str, symbol: &str, default: f64) -> Self {
        FunctionParameter {
            name: name.to_string(),
            symbol: symbol.to_string(),
            value: default,
            default,
        }
    }
}

/// Expression over `x` evaluated on `[start_x, end_x]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub kind: FunctionKind,
    pub parameters: Vec<FunctionParameter>,
    pub start_x: f64,
    pub end_x: f64,
}

const GAUSSIAN_EXPRESSION: &str = "exp(-0.5 * ((x - mu) / sigma)^2)";

impl Function {
    /// Exponential free induction decay
    pub fn fid() -> Self {
        Function {
            kind: FunctionKind::Fid,
            parameters: vec![FunctionParameter::new("T2star (microseconds)", "T2star", 10.0)],
            start_x: 0.0,
            end_x: 30.0,
        }
    }

    /// Lorentzian decay
    pub fn lorentzian() -> Self {
        Function {
            kind: FunctionKind::Lorentzian,
            parameters: vec![FunctionParameter::new("T2star (microseconds)", "T2star", 10.0)],
            start_x: 0.0,
            end_x: 30.0,
        }
    }

    /// Gaussian bell
    pub fn gaussian() -> Self {
        Function {
            kind: FunctionKind::Gaussian,
            parameters: vec![
                FunctionParameter::new("Mean", "mu", 0.0),
                FunctionParameter::new("Standard Deviation", "sigma", 1.0),
            ],
            start_x: -PI,
            end_x: PI,
        }
    }

    /// Rectangular window (no weighting)
    pub fn rect() -> Self {
        Function {
            kind: FunctionKind::Rect,
            parameters: Vec::new(),
            start_x: -1.0,
            end_x: 1.0,
        }
    }

    /// Sinc window
    pub fn sinc() -> Self {
        Function {
            kind: FunctionKind::Sinc,
            parameters: vec![FunctionParameter::new("Scale Factor", "l", 2.0)],
            start_x: -PI,
            end_x: PI,
        }
    }

    /// User expression; syntax is checked immediately
    ///
    /// Starts with the Gaussian parameters `mu` and `sigma`, more can be
    /// added with [`Function::add_parameter`].
    pub fn custom(expression: &str) -> NqrResult<Self> {
        let function = Function {
            kind: FunctionKind::Custom {
                expression: expression.to_string(),
            },
            parameters: vec![
                FunctionParameter::new("Mean", "mu", 0.0),
                FunctionParameter::new("Standard Deviation", "sigma", 1.0),
            ],
            start_x: -1.0,
            end_x: 1.0,
        };
        function.validate()?;
        Ok(function)
    }

    /// All built-in functions with default parameters
    pub fn builtins() -> Vec<Function> {
        vec![
            Function::fid(),
            Function::lorentzian(),
            Function::gaussian(),
            Function::rect(),
            Function::sinc(),
            Function {
                kind: FunctionKind::Custom {
                    expression: GAUSSIAN_EXPRESSION.to_string(),
                },
                start_x: -1.0,
                end_x: 1.0,
                ..Function::gaussian()
            },
        ]
    }

    /// Built-in function by display name (case insensitive)
    pub fn by_name(name: &str) -> Option<Function> {
        Self::builtins()
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }

    /// Display name
    pub fn name(&self) -> &'static str {
        match self.kind {
            FunctionKind::Fid => "FID",
            FunctionKind::Lorentzian => "Lorentzian",
            FunctionKind::Gaussian => "Gaussian",
            FunctionKind::Rect => "Rect",
            FunctionKind::Sinc => "Sinc",
            FunctionKind::Custom { .. } => "Custom",
        }
    }

    /// Expression text of the function
    pub fn expression(&self) -> &str {
        match &self.kind {
            FunctionKind::Fid => "exp(-x / T2star)",
            FunctionKind::Lorentzian => "1 / (1 + (x / T2star)^2)",
            FunctionKind::Gaussian => GAUSSIAN_EXPRESSION,
            FunctionKind::Rect => "1",
            FunctionKind::Sinc => "sin(x * l) / (x * l)",
            FunctionKind::Custom { expression } => expression,
        }
    }

    /// Current value of a parameter
    pub fn parameter(&self, symbol: &str) -> Option<f64> {
        self.parameters
            .iter()
            .find(|p| p.symbol == symbol)
            .map(|p| p.value)
    }

    /// Change a parameter value
    pub fn set_parameter(&mut self, symbol: &str, value: f64) -> NqrResult<()> {
        if !value.is_finite() {
            return Err(self.error(format!("parameter '{}' must be finite", symbol)));
        }

        let name = self.name();
        match self.parameters.iter_mut().find(|p| p.symbol == symbol) {
            Some(param) => {
                param.value = value;
                Ok(())
            }
            None => Err(NqrError::FunctionError {
                function: name.to_string(),
                reason: format!("unknown parameter '{}'", symbol),
            }),
        }
    }

    /// Add a parameter to a custom expression
    pub fn add_parameter(&mut self, name: &str, symbol: &str, default: f64) -> NqrResult<()> {
        if !matches!(self.kind, FunctionKind::Custom { .. }) {
            return Err(self.error("only custom functions accept new parameters".to_string()));
        }
        if self.parameter(symbol).is_some() || symbol == "x" {
            return Err(self.error(format!("symbol '{}' is already in use", symbol)));
        }

        self.parameters.push(FunctionParameter::new(name, symbol, default));
        Ok(())
    }

    /// Restore every parameter to its default
    pub fn reset_parameters(&mut self) {
        for param in &mut self.parameters {
            param.value = param.default;
        }
    }

    /// Change the evaluation interval
    pub fn set_interval(&mut self, start_x: f64, end_x: f64) -> NqrResult<()> {
        if !(start_x.is_finite() && end_x.is_finite()) || end_x <= start_x {
            return Err(self.error(format!("invalid interval [{}, {}]", start_x, end_x)));
        }

        self.start_x = start_x;
        self.end_x = end_x;
        Ok(())
    }

    /// Evaluate over `[0, duration]` so parameters are in microseconds
    pub fn span_time_axis(&mut self, duration_us: f64) -> NqrResult<()> {
        self.set_interval(0.0, duration_us)
    }

    /// Check that the function can be evaluated
    pub fn validate(&self) -> NqrResult<()> {
        if let FunctionKind::Custom { expression } = &self.kind {
            compile(expression).map_err(|reason| self.error(reason))?;
        }
        Ok(())
    }

    /// Evaluate at a single point
    pub fn evaluate(&self, x: f64) -> NqrResult<f64> {
        let mut evaluator = Evaluator::new(self)?;
        evaluator.evaluate(x)
    }

    /// Evaluate on `n` equally spaced points spanning the interval
    pub fn sample(&self, n: usize) -> NqrResult<Vec<f64>> {
        let mut evaluator = Evaluator::new(self)?;
        linspace(self.start_x, self.end_x, n)
            .into_iter()
            .map(|x| evaluator.evaluate(x))
            .collect()
    }

    fn error(&self, reason: String) -> NqrError {
        NqrError::FunctionError {
            function: self.name().to_string(),
            reason,
        }
    }
}

impl std::fmt::Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} on [{}, {}]", self.name(), self.expression(), self.start_x, self.end_x)?;
        for param in &self.parameters {
            write!(f, ", {} = {}", param.symbol, param.value)?;
        }
        Ok(())
    }
}

/// `n` equally spaced points from `start` to `end` inclusive
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Evaluation state reused across the points of one sampling run
struct Evaluator<'a> {
    function: &'a Function,
    compiled: Option<(Node, HashMapContext)>,
}

impl<'a> Evaluator<'a> {
    fn new(function: &'a Function) -> NqrResult<Self> {
        let compiled = match &function.kind {
            FunctionKind::Custom { expression } => {
                let node = compile(expression).map_err(|reason| function.error(reason))?;
                let mut context = math_context().map_err(|reason| function.error(reason))?;
                for param in &function.parameters {
                    context
                        .set_value(param.symbol.clone(), Value::Float(param.value))
                        .map_err(|e| function.error(e.to_string()))?;
                }
                Some((node, context))
            }
            _ => None,
        };

        Ok(Evaluator { function, compiled })
    }

    fn evaluate(&mut self, x: f64) -> NqrResult<f64> {
        let function = self.function;
        let param = |symbol: &str| function.parameter(symbol).unwrap_or(f64::NAN);

        let value = match (&function.kind, &mut self.compiled) {
            (FunctionKind::Fid, _) => (-x / param("T2star")).exp(),
            (FunctionKind::Lorentzian, _) => 1.0 / (1.0 + (x / param("T2star")).powi(2)),
            (FunctionKind::Gaussian, _) => {
                (-0.5 * ((x - param("mu")) / param("sigma")).powi(2)).exp()
            }
            (FunctionKind::Rect, _) => 1.0,
            (FunctionKind::Sinc, _) => {
                let arg = x * param("l");
                if arg == 0.0 { 1.0 } else { arg.sin() / arg }
            }
            (FunctionKind::Custom { .. }, Some((node, context))) => {
                context
                    .set_value("x".to_string(), Value::Float(x))
                    .map_err(|e| function.error(e.to_string()))?;
                node.eval_number_with_context(&*context)
                    .map_err(|e| function.error(e.to_string()))?
            }
            (FunctionKind::Custom { .. }, None) => {
                return Err(function.error("expression not compiled".to_string()));
            }
        };

        if value.is_finite() {
            Ok(value)
        } else {
            Err(function.error(format!("non-finite value {} at x = {}", value, x)))
        }
    }
}

fn compile(expression: &str) -> Result<Node, String> {
    // Accept the `**` power operator as well as `^`
    let normalized = float_literals(&expression.replace("**", "^"));
    build_operator_tree(&normalized)
        .map_err(|e| format!("invalid expression '{}': {}", expression, e))
}

/// Write every integer literal as a float so `1/2` divides to 0.5
fn float_literals(expression: &str) -> String {
    let chars: Vec<char> = expression.chars().collect();
    let mut out = String::with_capacity(expression.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let in_identifier = i > 0 && (chars[i - 1].is_alphanumeric() || chars[i - 1] == '_' || chars[i - 1] == '.');
        if !c.is_ascii_digit() || in_identifier {
            out.push(c);
            i += 1;
            continue;
        }

        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        out.extend(&chars[start..i]);

        let continues = chars
            .get(i)
            .is_some_and(|next| *next == '.' || *next == 'e' || *next == 'E' || next.is_alphabetic() || *next == '_');
        if !continues {
            out.push_str(".0");
        }
    }

    out
}

fn math_context() -> Result<HashMapContext, String> {
    let unary: [(&str, fn(f64) -> f64); 12] = [
        ("exp", f64::exp),
        ("ln", f64::ln),
        ("log10", f64::log10),
        ("sqrt", f64::sqrt),
        ("abs", f64::abs),
        ("sin", f64::sin),
        ("cos", f64::cos),
        ("tan", f64::tan),
        ("atan", f64::atan),
        ("sinh", f64::sinh),
        ("cosh", f64::cosh),
        ("tanh", f64::tanh),
    ];

    let mut context = HashMapContext::new();
    for (name, op) in unary {
        context
            .set_function(
                name.to_string(),
                ExprFunction::new(move |arg| Ok(Value::Float(op(arg.as_number()?)))),
            )
            .map_err(|e| e.to_string())?;
    }
    context
        .set_value("pi".to_string(), Value::Float(PI))
        .map_err(|e| e.to_string())?;

    Ok(context)
}
