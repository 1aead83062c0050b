//! FILENAME: engine/src/evaluator.rs
//! PURPOSE: Evaluates AST expressions to compute cell values.
//! CONTEXT: After a formula is parsed into an AST, this module traverses the
//! tree and computes the final result. It handles cell lookups, arithmetic,
//! comparisons, string concatenation, and built-in spreadsheet functions.
//! Cell lookups never touch a grid directly — they go through the
//! `EvalContext` trait supplied by the caller, so the same evaluator serves a
//! single-sheet `Engine` and a cross-sheet-aware `Workbook` without knowing
//! which one it's talking to.

use crate::address::{a1_to_coord, CellCoord};
use crate::cell::{CellError, CellValue};
use parser::{BinaryOperator, BuiltinFunction, Expression, UnaryOperator, Value};
use std::collections::HashMap;
use std::rc::Rc;

/// What a context lookup for a single cell found.
#[derive(Debug, Clone)]
pub enum CellLookup {
    Empty,
    Value(CellValue),
    Error(CellError),
}

impl From<&CellValue> for CellLookup {
    fn from(value: &CellValue) -> Self {
        match value {
            CellValue::Empty => CellLookup::Empty,
            other => CellLookup::Value(other.clone()),
        }
    }
}

/// The read side of cell access the evaluator needs. Implemented by
/// `Engine` for single-sheet evaluation and by `Workbook` for
/// sheet-qualified references; the evaluator holds only a `&dyn EvalContext`
/// and never a concrete grid.
pub trait EvalContext {
    /// Looks up a cell on the sheet currently being evaluated.
    fn get_cell(&self, coord: CellCoord) -> CellLookup;

    /// Looks up every cell in the inclusive rectangle on the current sheet,
    /// in row-major order.
    fn get_range(&self, start: CellCoord, end: CellCoord) -> Vec<CellLookup>;

    /// Looks up a cell on a named sheet. `None` means the sheet doesn't
    /// exist (callers surface this as `#REF!`); single-sheet contexts that
    /// don't support sheet qualifiers should also return `None`.
    fn get_sheet_cell(&self, sheet: &str, coord: CellCoord) -> Option<CellLookup>;

    /// Looks up a rectangle of cells on a named sheet. `None` means the
    /// sheet doesn't exist.
    fn get_sheet_range(&self, sheet: &str, start: CellCoord, end: CellCoord) -> Option<Vec<CellLookup>>;

    /// The address of the cell whose formula is currently being evaluated.
    /// Used by cross-sheet-aware contexts to record dependency edges.
    fn current_address(&self) -> CellCoord;
}

/// The result of evaluating an expression. Maps onto `CellValue` but keeps
/// `Array` as an intermediate shape for range/aggregate handling.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalResult {
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(CellError),
    Array(Vec<EvalResult>),
}

impl EvalResult {
    pub fn to_cell_value(&self) -> CellValue {
        match self {
            EvalResult::Number(n) => CellValue::Number(*n),
            EvalResult::Text(s) => CellValue::Text(s.clone()),
            EvalResult::Boolean(b) => CellValue::Boolean(*b),
            EvalResult::Error(_) => CellValue::Empty,
            EvalResult::Array(arr) => arr.first().map(|v| v.to_cell_value()).unwrap_or(CellValue::Empty),
        }
    }

    /// Extracts the error, if this result or (for arrays) its first error
    /// element carries one. Used by the engine to populate `Cell::error`.
    pub fn to_cell_error(&self) -> Option<CellError> {
        match self {
            EvalResult::Error(e) => Some(e.clone()),
            EvalResult::Array(arr) => arr.iter().find_map(|v| v.to_cell_error()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            EvalResult::Number(n) => Some(*n),
            EvalResult::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            EvalResult::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            EvalResult::Boolean(b) => Some(*b),
            EvalResult::Number(n) => Some(*n != 0.0),
            EvalResult::Text(s) => match s.to_uppercase().as_str() {
                "TRUE" => Some(true),
                "FALSE" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            EvalResult::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            EvalResult::Text(s) => s.clone(),
            EvalResult::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            EvalResult::Error(e) => e.as_str(),
            EvalResult::Array(arr) => arr.first().map(|v| v.as_text()).unwrap_or_default(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, EvalResult::Error(_))
    }

    /// Flattens an array result into individual values. Non-array values
    /// return a single-element vector.
    pub fn flatten(&self) -> Vec<EvalResult> {
        match self {
            EvalResult::Array(arr) => arr.iter().flat_map(|item| item.flatten()).collect(),
            other => vec![other.clone()],
        }
    }
}

impl From<CellLookup> for EvalResult {
    fn from(lookup: CellLookup) -> Self {
        match lookup {
            CellLookup::Empty => EvalResult::Number(0.0),
            CellLookup::Value(v) => match v {
                CellValue::Empty => EvalResult::Number(0.0),
                CellValue::Number(n) => EvalResult::Number(n),
                CellValue::Text(s) => EvalResult::Text(s),
                CellValue::Boolean(b) => EvalResult::Boolean(b),
            },
            CellLookup::Error(e) => EvalResult::Error(e),
        }
    }
}

/// A registered function body: evaluates its own (unevaluated) arguments
/// against the evaluator that invoked it, so custom functions get the same
/// lazy-argument behavior as the built-ins (e.g. an IF-like custom function
/// can choose not to evaluate a branch).
pub type CustomFn<C> = Rc<dyn Fn(&Evaluator<'_, C>, &[Expression]) -> EvalResult>;

/// Holds functions registered beyond the fixed core function table, keyed
/// by the name the parser resolved to `BuiltinFunction::Custom`. Empty by
/// default; `Engine::register_function` is the real extension point.
pub struct FunctionRegistry<C: EvalContext> {
    custom: HashMap<String, CustomFn<C>>,
}

impl<C: EvalContext> FunctionRegistry<C> {
    pub fn new() -> Self {
        FunctionRegistry { custom: HashMap::new() }
    }

    pub fn register(&mut self, name: impl Into<String>, f: CustomFn<C>) {
        self.custom.insert(name.into().to_uppercase(), f);
    }

    fn get(&self, name: &str) -> Option<&CustomFn<C>> {
        self.custom.get(&name.to_uppercase())
    }
}

impl<C: EvalContext> Default for FunctionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluates parsed formula expressions against an `EvalContext`.
pub struct Evaluator<'a, C: EvalContext> {
    ctx: &'a C,
    registry: Option<&'a FunctionRegistry<C>>,
}

impl<'a, C: EvalContext> Evaluator<'a, C> {
    pub fn new(ctx: &'a C) -> Self {
        Evaluator { ctx, registry: None }
    }

    pub fn with_registry(ctx: &'a C, registry: &'a FunctionRegistry<C>) -> Self {
        Evaluator { ctx, registry: Some(registry) }
    }

    /// Evaluates an expression. A bare `Range` node here is a runtime error
    /// per spec — ranges are only meaningful as a direct argument of an
    /// aggregator function call (see `eval_range_arg`, used by
    /// `collect_numbers`), never as a value in their own right.
    pub fn evaluate(&self, expr: &Expression) -> EvalResult {
        match expr {
            Expression::Literal(value) => self.eval_literal(value),
            Expression::CellRef { sheet, col, row, .. } => self.eval_cell_ref(sheet, col, *row),
            Expression::Range { .. } => EvalResult::Error(CellError::Value("range-out-of-context".to_string())),
            Expression::BinaryOp { left, op, right } => self.eval_binary_op(left, op, right),
            Expression::UnaryOp { op, operand } => self.eval_unary_op(op, operand),
            Expression::FunctionCall { func, args } => self.eval_function(func, args),
        }
    }

    /// Evaluates an expression that appears as a direct argument of an
    /// aggregator function call, where a `Range` node is admissible.
    fn eval_range_arg(&self, expr: &Expression) -> EvalResult {
        match expr {
            Expression::Range { sheet, start, end } => self.eval_range(sheet, start, end),
            other => self.evaluate(other),
        }
    }

    fn eval_literal(&self, value: &Value) -> EvalResult {
        match value {
            Value::Number(n) => EvalResult::Number(*n),
            Value::String(s) => EvalResult::Text(s.clone()),
            Value::Boolean(b) => EvalResult::Boolean(*b),
        }
    }

    fn eval_cell_ref(&self, sheet: &Option<String>, col: &str, row: u32) -> EvalResult {
        let coord = match a1_to_coord(col, row) {
            Ok(c) => c,
            Err(_) => return EvalResult::Error(CellError::Ref),
        };

        match sheet {
            None => self.ctx.get_cell(coord).into(),
            Some(name) => match self.ctx.get_sheet_cell(name, coord) {
                Some(lookup) => lookup.into(),
                None => EvalResult::Error(CellError::Ref),
            },
        }
    }

    fn eval_range(&self, sheet: &Option<String>, start: &Expression, end: &Expression) -> EvalResult {
        let (start_col, start_row) = match start {
            Expression::CellRef { col, row, .. } => (col.clone(), *row),
            _ => return EvalResult::Error(CellError::Ref),
        };
        let (end_col, end_row) = match end {
            Expression::CellRef { col, row, .. } => (col.clone(), *row),
            _ => return EvalResult::Error(CellError::Ref),
        };

        let start_coord = match a1_to_coord(&start_col, start_row) {
            Ok(c) => c,
            Err(_) => return EvalResult::Error(CellError::Ref),
        };
        let end_coord = match a1_to_coord(&end_col, end_row) {
            Ok(c) => c,
            Err(_) => return EvalResult::Error(CellError::Ref),
        };

        let top_left = (start_coord.0.min(end_coord.0), start_coord.1.min(end_coord.1));
        let bottom_right = (start_coord.0.max(end_coord.0), start_coord.1.max(end_coord.1));

        let lookups = match sheet {
            None => self.ctx.get_range(top_left, bottom_right),
            Some(name) => match self.ctx.get_sheet_range(name, top_left, bottom_right) {
                Some(vals) => vals,
                None => return EvalResult::Error(CellError::Ref),
            },
        };

        EvalResult::Array(lookups.into_iter().map(EvalResult::from).collect())
    }

    fn eval_binary_op(&self, left: &Expression, op: &BinaryOperator, right: &Expression) -> EvalResult {
        let left_val = self.evaluate(left);
        if let EvalResult::Error(e) = &left_val {
            return EvalResult::Error(e.clone());
        }
        let right_val = self.evaluate(right);
        if let EvalResult::Error(e) = &right_val {
            return EvalResult::Error(e.clone());
        }

        match op {
            BinaryOperator::Add => Self::numeric_op(&left_val, &right_val, |l, r| l + r),
            BinaryOperator::Subtract => Self::numeric_op(&left_val, &right_val, |l, r| l - r),
            BinaryOperator::Multiply => Self::numeric_op(&left_val, &right_val, |l, r| l * r),
            BinaryOperator::Divide => match (left_val.as_number(), right_val.as_number()) {
                (Some(_), Some(r)) if r == 0.0 => EvalResult::Error(CellError::Div0),
                (Some(l), Some(r)) => EvalResult::Number(l / r),
                _ => EvalResult::Error(CellError::Value("non-numeric operand".to_string())),
            },
            BinaryOperator::Power => match (left_val.as_number(), right_val.as_number()) {
                (Some(l), Some(r)) => {
                    let result = l.powf(r);
                    if result.is_nan() || result.is_infinite() {
                        EvalResult::Error(CellError::Value("exponent out of range".to_string()))
                    } else {
                        EvalResult::Number(result)
                    }
                }
                _ => EvalResult::Error(CellError::Value("non-numeric operand".to_string())),
            },
            BinaryOperator::Concat => EvalResult::Text(format!("{}{}", left_val.as_text(), right_val.as_text())),
            BinaryOperator::Equal => EvalResult::Boolean(Self::values_equal(&left_val, &right_val)),
            BinaryOperator::NotEqual => EvalResult::Boolean(!Self::values_equal(&left_val, &right_val)),
            BinaryOperator::LessThan => Self::compare(&left_val, &right_val, |o| o == std::cmp::Ordering::Less),
            BinaryOperator::GreaterThan => Self::compare(&left_val, &right_val, |o| o == std::cmp::Ordering::Greater),
            BinaryOperator::LessEqual => Self::compare(&left_val, &right_val, |o| o != std::cmp::Ordering::Greater),
            BinaryOperator::GreaterEqual => Self::compare(&left_val, &right_val, |o| o != std::cmp::Ordering::Less),
        }
    }

    fn numeric_op(left: &EvalResult, right: &EvalResult, f: impl Fn(f64, f64) -> f64) -> EvalResult {
        match (left.as_number(), right.as_number()) {
            (Some(l), Some(r)) => EvalResult::Number(f(l, r)),
            _ => EvalResult::Error(CellError::Value("non-numeric operand".to_string())),
        }
    }

    fn values_equal(left: &EvalResult, right: &EvalResult) -> bool {
        match (left, right) {
            (EvalResult::Number(l), EvalResult::Number(r)) => (l - r).abs() < f64::EPSILON,
            (EvalResult::Text(l), EvalResult::Text(r)) => l.to_uppercase() == r.to_uppercase(),
            (EvalResult::Boolean(l), EvalResult::Boolean(r)) => l == r,
            (EvalResult::Number(n), EvalResult::Text(s)) | (EvalResult::Text(s), EvalResult::Number(n)) => {
                s.parse::<f64>().map(|parsed| (parsed - n).abs() < f64::EPSILON).unwrap_or(false)
            }
            _ => false,
        }
    }

    fn compare(left: &EvalResult, right: &EvalResult, pred: impl Fn(std::cmp::Ordering) -> bool) -> EvalResult {
        if let (Some(l), Some(r)) = (left.as_number(), right.as_number()) {
            return match l.partial_cmp(&r) {
                Some(o) => EvalResult::Boolean(pred(o)),
                None => EvalResult::Error(CellError::Value("operands not comparable".to_string())),
            };
        }
        if let (EvalResult::Text(l), EvalResult::Text(r)) = (left, right) {
            return EvalResult::Boolean(pred(l.to_uppercase().cmp(&r.to_uppercase())));
        }
        EvalResult::Error(CellError::Value("operands not comparable".to_string()))
    }

    fn eval_unary_op(&self, op: &UnaryOperator, operand: &Expression) -> EvalResult {
        let val = self.evaluate(operand);
        if let EvalResult::Error(e) = &val {
            return EvalResult::Error(e.clone());
        }
        match op {
            UnaryOperator::Negate => match val.as_number() {
                Some(n) => EvalResult::Number(-n),
                None => EvalResult::Error(CellError::Value("non-numeric operand".to_string())),
            },
        }
    }

    fn eval_function(&self, func: &BuiltinFunction, args: &[Expression]) -> EvalResult {
        match func {
            BuiltinFunction::Sum => self.fn_sum(args),
            BuiltinFunction::Average => self.fn_average(args),
            BuiltinFunction::Count => self.fn_count(args),
            BuiltinFunction::Max => self.fn_max(args),
            BuiltinFunction::Min => self.fn_min(args),
            BuiltinFunction::If => self.fn_if(args),
            BuiltinFunction::And => self.fn_and(args),
            BuiltinFunction::Or => self.fn_or(args),
            BuiltinFunction::Not => self.fn_not(args),
            BuiltinFunction::Concatenate => self.fn_concatenate(args),
            BuiltinFunction::Upper => self.fn_upper(args),
            BuiltinFunction::Lower => self.fn_lower(args),
            BuiltinFunction::Len => self.fn_len(args),
            BuiltinFunction::Custom(name) => match self.registry.and_then(|r| r.get(name)) {
                Some(f) => f(self, args),
                None => EvalResult::Error(CellError::Name(format!("Unknown function: {}", name))),
            },
        }
    }

    /// Evaluates every argument, flattening ranges, and collects the
    /// numeric-coercible values — used uniformly by SUM/AVERAGE/COUNT/MAX/
    /// MIN whether an argument is a bare scalar or a range.
    fn collect_numbers(&self, args: &[Expression]) -> Result<Vec<f64>, CellError> {
        let mut numbers = Vec::new();
        for arg in args {
            for item in self.eval_range_arg(arg).flatten() {
                if let EvalResult::Error(e) = item {
                    return Err(e);
                }
                if let Some(n) = item.as_number() {
                    numbers.push(n);
                }
            }
        }
        Ok(numbers)
    }

    fn fn_sum(&self, args: &[Expression]) -> EvalResult {
        match self.collect_numbers(args) {
            Ok(numbers) => EvalResult::Number(numbers.iter().sum()),
            Err(e) => EvalResult::Error(e),
        }
    }

    fn fn_average(&self, args: &[Expression]) -> EvalResult {
        match self.collect_numbers(args) {
            Ok(numbers) if numbers.is_empty() => EvalResult::Error(CellError::Div0),
            Ok(numbers) => EvalResult::Number(numbers.iter().sum::<f64>() / numbers.len() as f64),
            Err(e) => EvalResult::Error(e),
        }
    }

    fn fn_count(&self, args: &[Expression]) -> EvalResult {
        match self.collect_numbers(args) {
            Ok(numbers) => EvalResult::Number(numbers.len() as f64),
            Err(e) => EvalResult::Error(e),
        }
    }

    fn fn_max(&self, args: &[Expression]) -> EvalResult {
        match self.collect_numbers(args) {
            Ok(numbers) if numbers.is_empty() => EvalResult::Number(0.0),
            Ok(numbers) => EvalResult::Number(numbers.into_iter().fold(f64::NEG_INFINITY, f64::max)),
            Err(e) => EvalResult::Error(e),
        }
    }

    fn fn_min(&self, args: &[Expression]) -> EvalResult {
        match self.collect_numbers(args) {
            Ok(numbers) if numbers.is_empty() => EvalResult::Number(0.0),
            Ok(numbers) => EvalResult::Number(numbers.into_iter().fold(f64::INFINITY, f64::min)),
            Err(e) => EvalResult::Error(e),
        }
    }

    fn fn_if(&self, args: &[Expression]) -> EvalResult {
        if args.len() < 2 || args.len() > 3 {
            return EvalResult::Error(CellError::Value("IF requires 2 or 3 arguments".to_string()));
        }
        let condition = self.evaluate(&args[0]);
        if let EvalResult::Error(e) = condition {
            return EvalResult::Error(e);
        }
        if condition.as_boolean().unwrap_or(false) {
            self.evaluate(&args[1])
        } else if args.len() == 3 {
            self.evaluate(&args[2])
        } else {
            EvalResult::Boolean(false)
        }
    }

    fn fn_and(&self, args: &[Expression]) -> EvalResult {
        if args.is_empty() {
            return EvalResult::Error(CellError::Value("AND requires at least 1 argument".to_string()));
        }
        for arg in args {
            let result = self.evaluate(arg);
            if let EvalResult::Error(e) = result {
                return EvalResult::Error(e);
            }
            match result.as_boolean() {
                Some(false) => return EvalResult::Boolean(false),
                None => return EvalResult::Error(CellError::Value("non-boolean argument".to_string())),
                _ => {}
            }
        }
        EvalResult::Boolean(true)
    }

    fn fn_or(&self, args: &[Expression]) -> EvalResult {
        if args.is_empty() {
            return EvalResult::Error(CellError::Value("OR requires at least 1 argument".to_string()));
        }
        for arg in args {
            let result = self.evaluate(arg);
            if let EvalResult::Error(e) = result {
                return EvalResult::Error(e);
            }
            match result.as_boolean() {
                Some(true) => return EvalResult::Boolean(true),
                None => return EvalResult::Error(CellError::Value("non-boolean argument".to_string())),
                _ => {}
            }
        }
        EvalResult::Boolean(false)
    }

    fn fn_not(&self, args: &[Expression]) -> EvalResult {
        if args.len() != 1 {
            return EvalResult::Error(CellError::Value("NOT requires exactly 1 argument".to_string()));
        }
        let result = self.evaluate(&args[0]);
        if let EvalResult::Error(e) = result {
            return EvalResult::Error(e);
        }
        match result.as_boolean() {
            Some(b) => EvalResult::Boolean(!b),
            None => EvalResult::Error(CellError::Value("non-boolean argument".to_string())),
        }
    }

    fn fn_concatenate(&self, args: &[Expression]) -> EvalResult {
        let mut result = String::new();
        for arg in args {
            let val = self.evaluate(arg);
            if let EvalResult::Error(e) = val {
                return EvalResult::Error(e);
            }
            result.push_str(&val.as_text());
        }
        EvalResult::Text(result)
    }

    fn fn_upper(&self, args: &[Expression]) -> EvalResult {
        if args.len() != 1 {
            return EvalResult::Error(CellError::NotAvailable("UPPER requires exactly 1 argument".to_string()));
        }
        EvalResult::Text(self.evaluate(&args[0]).as_text().to_uppercase())
    }

    fn fn_lower(&self, args: &[Expression]) -> EvalResult {
        if args.len() != 1 {
            return EvalResult::Error(CellError::NotAvailable("LOWER requires exactly 1 argument".to_string()));
        }
        EvalResult::Text(self.evaluate(&args[0]).as_text().to_lowercase())
    }

    fn fn_len(&self, args: &[Expression]) -> EvalResult {
        if args.len() != 1 {
            return EvalResult::Error(CellError::NotAvailable("LEN requires exactly 1 argument".to_string()));
        }
        EvalResult::Number(self.evaluate(&args[0]).as_text().chars().count() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap as Map;

    /// A minimal single-sheet test context backed by a plain map, standing
    /// in for `Engine` without pulling in the grid/dependency machinery.
    struct TestContext {
        cells: Map<CellCoord, CellLookup>,
        current: RefCell<CellCoord>,
    }

    impl TestContext {
        fn new() -> Self {
            TestContext { cells: Map::new(), current: RefCell::new((0, 0)) }
        }

        fn set(&mut self, a1: &str, value: CellValue) {
            let coord = parse_a1(a1);
            self.cells.insert(coord, CellLookup::Value(value));
        }

        fn set_error(&mut self, a1: &str, error: CellError) {
            let coord = parse_a1(a1);
            self.cells.insert(coord, CellLookup::Error(error));
        }
    }

    fn parse_a1(label: &str) -> CellCoord {
        let col: String = label.chars().take_while(|c| c.is_alphabetic()).collect();
        let row: u32 = label[col.len()..].parse().unwrap();
        a1_to_coord(&col, row).unwrap()
    }

    impl EvalContext for TestContext {
        fn get_cell(&self, coord: CellCoord) -> CellLookup {
            self.cells.get(&coord).cloned().unwrap_or(CellLookup::Empty)
        }
        fn get_range(&self, start: CellCoord, end: CellCoord) -> Vec<CellLookup> {
            let mut out = Vec::new();
            for r in start.0..=end.0 {
                for c in start.1..=end.1 {
                    out.push(self.get_cell((r, c)));
                }
            }
            out
        }
        fn get_sheet_cell(&self, _sheet: &str, _coord: CellCoord) -> Option<CellLookup> {
            None
        }
        fn get_sheet_range(&self, _sheet: &str, _start: CellCoord, _end: CellCoord) -> Option<Vec<CellLookup>> {
            None
        }
        fn current_address(&self) -> CellCoord {
            *self.current.borrow()
        }
    }

    fn eval(ctx: &TestContext, formula: &str) -> EvalResult {
        let expr = parser::parse(formula).unwrap();
        Evaluator::new(ctx).evaluate(&expr)
    }

    #[test]
    fn test_arithmetic() {
        let ctx = TestContext::new();
        assert_eq!(eval(&ctx, "2+3*4"), EvalResult::Number(14.0));
    }

    #[test]
    fn test_cell_ref_resolves_from_context() {
        let mut ctx = TestContext::new();
        ctx.set("A1", CellValue::Number(5.0));
        assert_eq!(eval(&ctx, "A1+1"), EvalResult::Number(6.0));
    }

    #[test]
    fn test_empty_cell_is_zero() {
        let ctx = TestContext::new();
        assert_eq!(eval(&ctx, "A1+1"), EvalResult::Number(1.0));
    }

    #[test]
    fn test_divide_by_zero() {
        let ctx = TestContext::new();
        assert_eq!(eval(&ctx, "1/0"), EvalResult::Error(CellError::Div0));
    }

    #[test]
    fn test_error_propagates_through_arithmetic() {
        let mut ctx = TestContext::new();
        ctx.set_error("A1", CellError::Div0);
        assert_eq!(eval(&ctx, "A1+1"), EvalResult::Error(CellError::Div0));
    }

    #[test]
    fn test_sum_over_range() {
        let mut ctx = TestContext::new();
        ctx.set("A1", CellValue::Number(1.0));
        ctx.set("A2", CellValue::Number(2.0));
        ctx.set("A3", CellValue::Number(3.0));
        assert_eq!(eval(&ctx, "SUM(A1:A3)"), EvalResult::Number(6.0));
    }

    #[test]
    fn test_average_empty_range_is_div0() {
        let ctx = TestContext::new();
        assert_eq!(eval(&ctx, "AVERAGE(A1:A1)"), EvalResult::Error(CellError::Div0));
    }

    #[test]
    fn test_count_treats_scalar_and_range_uniformly() {
        let mut ctx = TestContext::new();
        ctx.set("A1", CellValue::Number(1.0));
        ctx.set("A2", CellValue::Text("x".to_string()));
        assert_eq!(eval(&ctx, "COUNT(A1:A2, 10)"), EvalResult::Number(2.0));
    }

    #[test]
    fn test_if_short_circuits_untaken_branch_error() {
        // The false branch evaluates to #DIV/0!, but since the condition is
        // true, IF must not propagate it.
        let ctx = TestContext::new();
        assert_eq!(eval(&ctx, "IF(TRUE, 1, 1/0)"), EvalResult::Number(1.0));
    }

    #[test]
    fn test_bare_range_outside_function_call_is_value_error() {
        let mut ctx = TestContext::new();
        ctx.set("A1", CellValue::Number(1.0));
        ctx.set("A2", CellValue::Number(2.0));
        let expected = EvalResult::Error(CellError::Value("range-out-of-context".to_string()));
        assert_eq!(eval(&ctx, "A1:A2"), expected);
        assert_eq!(eval(&ctx, "A1:A2+1"), expected);
    }

    #[test]
    fn test_extra_args_on_unary_text_function_is_na() {
        let ctx = TestContext::new();
        assert_eq!(
            eval(&ctx, "UPPER(\"a\",\"b\")"),
            EvalResult::Error(CellError::NotAvailable("UPPER requires exactly 1 argument".to_string()))
        );
    }

    #[test]
    fn test_unknown_sheet_ref_is_ref_error() {
        let ctx = TestContext::new();
        assert_eq!(eval(&ctx, "Sheet2!A1"), EvalResult::Error(CellError::Ref));
    }

    #[test]
    fn test_custom_function_registry() {
        let ctx = TestContext::new();
        let mut registry: FunctionRegistry<TestContext> = FunctionRegistry::new();
        registry.register("DOUBLE", Rc::new(|ev: &Evaluator<TestContext>, args: &[Expression]| {
            match ev.evaluate(&args[0]).as_number() {
                Some(n) => EvalResult::Number(n * 2.0),
                None => EvalResult::Error(CellError::Value("non-numeric operand".to_string())),
            }
        }));

        let expr = parser::parse("DOUBLE(21)").unwrap();
        let result = Evaluator::with_registry(&ctx, &registry).evaluate(&expr);
        assert_eq!(result, EvalResult::Number(42.0));
    }

    #[test]
    fn test_unregistered_custom_function_is_name_error() {
        let ctx = TestContext::new();
        assert_eq!(
            eval(&ctx, "NOW()"),
            EvalResult::Error(CellError::Name("Unknown function: NOW".to_string()))
        );
    }

    #[test]
    fn test_concatenate_and_text_functions() {
        let ctx = TestContext::new();
        assert_eq!(eval(&ctx, "UPPER(\"abc\")"), EvalResult::Text("ABC".to_string()));
        assert_eq!(eval(&ctx, "LEN(\"hello\")"), EvalResult::Number(5.0));
        assert_eq!(
            eval(&ctx, "CONCATENATE(\"a\", \"b\", \"c\")"),
            EvalResult::Text("abc".to_string())
        );
    }
}
