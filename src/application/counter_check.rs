//! Counter Check
//!
//! Reports counters used without a rate-style function. Metric types are
//! looked up through the failover group, once per metric per run.

use crate::application::FailoverGroup;
use crate::domain::context::QueryContext;
use crate::domain::errors::FailoverError;
use crate::domain::value_objects::MetricType;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub const COUNTER_CHECK_NAME: &str = "promql/counter";

/// Functions that make a counter safe to use.
pub const RATE_FUNCTIONS: &[&str] = &["rate", "irate", "increase", "absent", "absent_over_time"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Information,
    Warning,
    Bug,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Information => "Information",
            Severity::Warning => "Warning",
            Severity::Bug => "Bug",
            Severity::Fatal => "Fatal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    /// Expression fragment the problem refers to
    pub fragment: String,
    pub reporter: String,
    pub text: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    VectorSelector { name: String },
    MatrixSelector,
    Call { func: String },
    Other,
}

/// A node of a parsed PromQL expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprNode {
    /// Source text of this node
    pub expr: String,
    pub kind: NodeKind,
    pub children: Vec<ExprNode>,
}

impl ExprNode {
    pub fn selector(name: &str) -> Self {
        Self::selector_expr(name, name)
    }

    /// Vector selector whose source text differs from the metric name,
    /// e.g. `foo offset 1m`.
    pub fn selector_expr(name: &str, expr: &str) -> Self {
        Self {
            expr: expr.to_string(),
            kind: NodeKind::VectorSelector {
                name: name.to_string(),
            },
            children: Vec::new(),
        }
    }

    pub fn matrix(selector: ExprNode, range: &str) -> Self {
        Self {
            expr: format!("{}[{}]", selector.expr, range),
            kind: NodeKind::MatrixSelector,
            children: vec![selector],
        }
    }

    pub fn call(func: &str, args: Vec<ExprNode>) -> Self {
        let rendered: Vec<&str> = args.iter().map(|a| a.expr.as_str()).collect();
        Self {
            expr: format!("{}({})", func, rendered.join(", ")),
            kind: NodeKind::Call {
                func: func.to_string(),
            },
            children: args,
        }
    }

    /// Any other node: aggregations, binary operators, subqueries.
    pub fn other(expr: &str, children: Vec<ExprNode>) -> Self {
        Self {
            expr: expr.to_string(),
            kind: NodeKind::Other,
            children,
        }
    }
}

/// Turn a failed query into problem text and severity.
///
/// Unavailable servers are reported as warnings since the rule itself may be
/// fine; any other failure gets `default_severity`.
pub fn text_and_severity_from_error(
    err: &FailoverError,
    reporter: &str,
    prom_name: &str,
    default_severity: Severity,
) -> (String, Severity) {
    let prom_desc = format!("prometheus {:?} at {}", prom_name, err.uri());
    if err.is_unavailable() {
        (
            format!(
                "couldn't run {:?} checks due to {} connection error: {}",
                reporter, prom_desc, err
            ),
            Severity::Warning,
        )
    } else {
        (format!("{} failed with: {}", prom_desc, err), default_severity)
    }
}

pub struct CounterCheck {
    prom: Arc<FailoverGroup>,
    error_severity: Severity,
}

impl CounterCheck {
    pub fn new(prom: Arc<FailoverGroup>) -> Self {
        Self {
            prom,
            error_severity: Severity::Bug,
        }
    }

    /// Severity for query failures other than an unavailable server.
    pub fn error_severity(mut self, severity: Severity) -> Self {
        self.error_severity = severity;
        self
    }

    pub fn reporter(&self) -> &'static str {
        COUNTER_CHECK_NAME
    }

    pub async fn check(&self, ctx: &QueryContext, expr: &ExprNode) -> Vec<Problem> {
        let mut is_counter: HashMap<String, bool> = HashMap::new();
        let mut problems = Vec::new();

        // Depth-first, left to right.
        let mut stack = vec![(expr, false)];
        while let Some((node, parent_uses_rate)) = stack.pop() {
            if let NodeKind::VectorSelector { name } = &node.kind {
                let counter = match is_counter.get(name) {
                    Some(c) => *c,
                    None => match self.prom.metadata(ctx, name).await {
                        Ok(md) => {
                            let c = md.has_type(MetricType::Counter);
                            is_counter.insert(name.clone(), c);
                            c
                        }
                        Err(err) => {
                            let (text, severity) = text_and_severity_from_error(
                                &err,
                                self.reporter(),
                                self.prom.name(),
                                self.error_severity,
                            );
                            problems.push(Problem {
                                fragment: name.clone(),
                                reporter: self.reporter().to_string(),
                                text,
                                severity,
                            });
                            continue;
                        }
                    },
                };

                if counter && !parent_uses_rate {
                    problems.push(Problem {
                        fragment: node.expr.clone(),
                        reporter: self.reporter().to_string(),
                        text: format!(
                            "counter metric `{}` should be used with `rate`, `irate` or `increase`",
                            name
                        ),
                        severity: Severity::Warning,
                    });
                }
            }

            let uses_rate = match &node.kind {
                // rate(x) and rate(x[2m]) are treated the same.
                NodeKind::MatrixSelector => parent_uses_rate,
                NodeKind::Call { func } => RATE_FUNCTIONS.contains(&func.as_str()),
                _ => false,
            };
            for child in node.children.iter().rev() {
                stack.push((child, uses_rate));
            }
        }

        problems
    }
}
