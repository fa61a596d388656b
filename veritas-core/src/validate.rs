//! Usage validation: classify every usage event of a script against the graph.
//!
//! Ambiguity always resolves toward UNCERTAIN or UNKNOWN. HALLUCINATED is only
//! returned when the receiver's class and every one of its ancestors are in
//! the graph, the chain is acyclic, and none of them defines dynamic attribute
//! lookup.

use std::path::Path;
use std::time::{Duration, Instant};

use similar::TextDiff;
use tracing::{debug, info, instrument};
use veritas_graphs::{
    CallArgs, GraphError, Param, ParamKind, UsageEvent, UsageKind, extract_usages, parse_python,
    render_params,
};

use crate::config::ValidateSection;
use crate::error::ValidateError;
use crate::hierarchy::Lineage;
use crate::report::build_report;
use crate::resolve::{Resolution, Symbol, SymbolResolver};
use crate::store::GraphStore;
use crate::types::{ClassView, ValidatedEvent, ValidationReport, Verdict};

/// Label used for scripts validated from text.
pub const INLINE_SCRIPT: &str = "<inline>";

const DYNAMIC_LOOKUP: &[&str] = &["__getattr__", "__getattribute__"];

/// Confidence ceiling for verdicts that rest on a bare name matched only by
/// its short form.
pub const SHORT_NAME_CONFIDENCE: f64 = 0.5;

/// Verdict plus everything needed to explain it.
#[derive(Debug, Clone, PartialEq)]
struct Judgement {
    verdict: Verdict,
    detail: String,
    suggestions: Vec<String>,
    expected_signature: Option<String>,
    /// Replaces the extractor's kind once resolution knows better.
    kind: Option<UsageKind>,
    /// The symbol was matched by short name only.
    guessed: bool,
}

impl Judgement {
    fn new(verdict: Verdict, detail: impl Into<String>) -> Self {
        Self {
            verdict,
            detail: detail.into(),
            suggestions: Vec::new(),
            expected_signature: None,
            kind: None,
            guessed: false,
        }
    }

    fn resolved_by(mut self, resolution: Resolution) -> Self {
        if resolution == Resolution::ShortName {
            self.guessed = true;
            self.detail.push_str(" (matched by short name)");
        }
        self
    }

    fn confidence(&self) -> f64 {
        let base = self.verdict.confidence();
        if self.guessed {
            base.min(SHORT_NAME_CONFIDENCE)
        } else {
            base
        }
    }
}

/// Checks the argument shape of a call site against a parameter list.
///
/// Returns a description of the first mismatch. Splatted arguments satisfy
/// any requirement they could plausibly cover.
pub fn check_signature(params: &[Param], args: &CallArgs) -> Result<(), String> {
    let positional: Vec<&Param> = params.iter().filter(|p| p.is_positional()).collect();
    let takes_var_args = params.iter().any(|p| p.kind == ParamKind::VarArgs);
    let takes_var_kwargs = params.iter().any(|p| p.kind == ParamKind::VarKwargs);

    if args.positional > positional.len() && !takes_var_args {
        return Err(format!(
            "takes {} positional argument(s) but {} were given",
            positional.len(),
            args.positional
        ));
    }

    for (i, keyword) in args.keywords.iter().enumerate() {
        if args.keywords[..i].contains(keyword) {
            return Err(format!("keyword argument `{keyword}` given twice"));
        }
        let positional_only = params
            .iter()
            .any(|p| p.name == *keyword && p.kind == ParamKind::PositionalOnly);
        if positional_only && !takes_var_kwargs {
            return Err(format!("positional-only argument `{keyword}` passed as keyword"));
        }
        let slot = params.iter().position(|p| {
            p.name == *keyword && matches!(p.kind, ParamKind::Positional | ParamKind::Keyword)
        });
        match slot {
            None if !takes_var_kwargs => {
                return Err(format!("unexpected keyword argument `{keyword}`"));
            }
            Some(index) if params[index].kind == ParamKind::Positional => {
                let rank = positional.iter().position(|p| p.name == *keyword).unwrap_or(usize::MAX);
                if rank < args.positional {
                    return Err(format!("multiple values for argument `{keyword}`"));
                }
            }
            _ => {}
        }
    }

    for (rank, param) in positional.iter().enumerate() {
        let by_name = param.kind == ParamKind::Positional && args.keywords.contains(&param.name);
        let covered = rank < args.positional
            || by_name
            || args.star_args
            || args.star_kwargs;
        if param.is_required() && !covered {
            return Err(format!("missing required argument `{}`", param.name));
        }
    }
    for param in params.iter().filter(|p| p.kind == ParamKind::Keyword) {
        let covered = args.keywords.contains(&param.name) || args.star_kwargs;
        if param.is_required() && !covered {
            return Err(format!("missing required keyword argument `{}`", param.name));
        }
    }
    Ok(())
}

/// Validates scripts against a populated store. Read-only.
#[derive(Debug)]
pub struct Validator<'a, S: GraphStore + ?Sized> {
    store: &'a S,
    resolver: SymbolResolver<'a, S>,
    config: ValidateSection,
}

impl<'a, S: GraphStore + ?Sized> Validator<'a, S> {
    pub fn new(store: &'a S, config: ValidateSection) -> Self {
        Self {
            store,
            resolver: SymbolResolver::new(store),
            config,
        }
    }

    /// Validate a script file.
    pub async fn validate_script(&self, path: &Path) -> crate::error::Result<ValidationReport> {
        let source = std::fs::read_to_string(path).map_err(|source| ValidateError::Read {
            path: path.display().to_string(),
            source,
        })?;
        self.validate_text(&source, &path.display().to_string()).await
    }

    /// Validate script source. `label` names the script in the report.
    #[instrument(skip(self, source), name = "validate")]
    pub async fn validate_text(
        &self,
        source: &str,
        label: &str,
    ) -> crate::error::Result<ValidationReport> {
        let deadline = Instant::now() + Duration::from_millis(self.config.budget_ms);
        let path = Path::new(label);

        let events = match parse_python(source, path)
            .and_then(|parsed| extract_usages(&parsed, path, Some(deadline)))
        {
            Ok(events) => events,
            Err(GraphError::Timeout { .. }) => {
                return Ok(build_report(
                    label,
                    Vec::new(),
                    true,
                    vec!["usage extraction exceeded the validation budget".to_string()],
                ));
            }
            Err(e @ (GraphError::Parse { .. } | GraphError::TreeSitter(_))) => {
                debug!(error = %e, "Script could not be parsed");
                return Ok(build_report(label, Vec::new(), false, vec![e.to_string()]));
            }
            Err(e) => return Err(e.into()),
        };

        let mut validated = Vec::with_capacity(events.len());
        let mut truncated = false;
        for event in &events {
            if Instant::now() >= deadline {
                truncated = true;
                break;
            }
            validated.push(self.validate_event(event).await?);
        }

        let report = build_report(label, validated, truncated, Vec::new());
        info!(
            script = label,
            events = report.summary.total,
            hallucinated = report.summary.hallucinated,
            rate = report.hallucination_rate,
            truncated,
            "Validation complete"
        );
        Ok(report)
    }

    /// Classify a single usage event.
    pub async fn validate_event(&self, event: &UsageEvent) -> crate::error::Result<ValidatedEvent> {
        let judgement = self.judge(event).await?;
        Ok(ValidatedEvent {
            line: event.line,
            column: event.column,
            kind: judgement.kind.unwrap_or(event.kind),
            symbol: event.display_symbol(),
            verdict: judgement.verdict,
            confidence: judgement.confidence(),
            detail: judgement.detail,
            suggestions: judgement.suggestions,
            expected_signature: judgement.expected_signature,
        })
    }

    async fn judge(&self, event: &UsageEvent) -> crate::error::Result<Judgement> {
        if event.kind == UsageKind::Import {
            return Ok(match self.resolver.resolve_traced(&event.symbol_path).await? {
                Some((symbol, resolution)) => {
                    Judgement::new(Verdict::Valid, format!("resolves to {}", symbol.key()))
                        .resolved_by(resolution)
                }
                None => Judgement::new(
                    Verdict::Unknown,
                    format!("`{}` is not in the knowledge graph", event.symbol_path),
                ),
            });
        }

        if event.has_receiver {
            let Some(type_key) = event.receiver_inferred_type.as_deref() else {
                return Ok(Judgement::new(Verdict::Uncertain, "receiver type could not be inferred"));
            };
            let Some((class, resolution)) = self.resolver.resolve_class(type_key).await? else {
                return Ok(Judgement::new(
                    Verdict::Uncertain,
                    format!("receiver class `{type_key}` is not in the knowledge graph"),
                ));
            };
            let judgement = self.judge_member(&class, &event.symbol_path, event, true).await?;
            return Ok(judgement.resolved_by(resolution));
        }

        let Some((symbol, resolution)) = self.resolver.resolve_traced(&event.symbol_path).await?
        else {
            if let Some((class, member, resolution)) =
                self.resolver.resolve_member_path(&event.symbol_path).await?
            {
                let judgement = self.judge_member(&class, &member, event, false).await?;
                return Ok(judgement.resolved_by(resolution));
            }
            return Ok(Judgement::new(
                Verdict::Unknown,
                format!("`{}` is not in the knowledge graph", event.symbol_path),
            ));
        };

        let judgement = match symbol {
            Symbol::Class(class) => match event.kind {
                UsageKind::Instantiate | UsageKind::Call => {
                    self.judge_instantiation(&class, event).await?
                }
                _ => Judgement::new(Verdict::Valid, format!("class {}", class.key)),
            },
            Symbol::Function(function) => match event.kind {
                UsageKind::Instantiate | UsageKind::Call => judge_call(
                    &function.name,
                    &function.params,
                    event.args.as_ref(),
                    format!("function {}", function.key),
                ),
                _ => Judgement::new(Verdict::Valid, format!("function {}", function.key)),
            },
            Symbol::Module(module) => match event.kind {
                UsageKind::AttributeAccess => Judgement::new(Verdict::Valid, format!("module {module}")),
                _ => Judgement::new(Verdict::Uncertain, format!("`{module}` is a module, not a callable")),
            },
        };
        Ok(judgement.resolved_by(resolution))
    }

    async fn judge_instantiation(
        &self,
        class: &ClassView,
        event: &UsageEvent,
    ) -> crate::error::Result<Judgement> {
        let init = self.store.resolve_method(&class.key, "__init__").await?;
        Ok(match (init.member, init.stopped_at) {
            (Some(init), _) => judge_call(
                &class.name,
                &init.params,
                event.args.as_ref(),
                format!("class {} (via {})", class.key, init.key),
            ),
            (None, Some(base)) => Judgement::new(
                Verdict::Valid,
                format!("class {} (arguments unchecked: ancestor `{base}` is not in the knowledge graph)", class.key),
            ),
            (None, None) => Judgement::new(
                Verdict::Valid,
                format!("class {} (no __init__ to check arguments against)", class.key),
            ),
        })
    }

    /// Member lookup on a resolved class. `on_instance` is false for
    /// `Class.member` paths, where a plain method may be handed its receiver
    /// explicitly and is therefore not signature-checked.
    ///
    /// A member call is a call whatever the case of its name, so an event
    /// the extractor took for an instantiation is reclassified.
    async fn judge_member(
        &self,
        class: &ClassView,
        member: &str,
        event: &UsageEvent,
        on_instance: bool,
    ) -> crate::error::Result<Judgement> {
        let mut judgement = self.lookup_member(class, member, event, on_instance).await?;
        if event.kind == UsageKind::Instantiate {
            judgement.kind = Some(UsageKind::Call);
        }
        Ok(judgement)
    }

    async fn lookup_member(
        &self,
        class: &ClassView,
        member: &str,
        event: &UsageEvent,
        on_instance: bool,
    ) -> crate::error::Result<Judgement> {
        let is_call = matches!(event.kind, UsageKind::Call | UsageKind::Instantiate);
        let method = self.store.resolve_method(&class.key, member).await?;
        if let Some(found) = method.member {
            let detail = format!("method {}", found.key);
            let unchecked = !is_call
                || found.is_property
                || (!on_instance && !found.is_static && !found.is_class_method);
            if unchecked {
                return Ok(Judgement::new(Verdict::Valid, detail));
            }
            return Ok(judge_call(member, &found.params, event.args.as_ref(), detail));
        }

        let attr = self.store.resolve_attribute(&class.key, member).await?;
        if let Some(found) = attr.member {
            return Ok(Judgement::new(
                Verdict::Valid,
                format!("{} attribute {}", found.kind.as_str(), found.key),
            ));
        }

        if let Some(base) = method.stopped_at.or(attr.stopped_at) {
            return Ok(Judgement::new(
                Verdict::Uncertain,
                format!(
                    "`{member}` not found on {} before ancestor `{base}`, which is not in the knowledge graph",
                    class.key
                ),
            ));
        }

        let lineage = method.lineage;
        if let Some(reason) = self.inconclusive(&lineage).await? {
            return Ok(Judgement::new(
                Verdict::Uncertain,
                format!("`{member}` not found on {}, but {reason}", class.key),
            ));
        }

        let mut judgement = Judgement::new(
            Verdict::Hallucinated,
            format!("`{member}` is not defined on {} or its ancestors", class.key),
        );
        judgement.suggestions = self.suggest(&lineage, member).await?;
        Ok(judgement)
    }

    /// Why a missing member does not prove a hallucination, if it doesn't.
    async fn inconclusive(&self, lineage: &Lineage) -> crate::error::Result<Option<String>> {
        if lineage.cycle {
            return Ok(Some("its inheritance chain is cyclic".to_string()));
        }
        if let Some(base) = lineage.dangling().first() {
            return Ok(Some(format!("ancestor `{base}` is not in the knowledge graph")));
        }
        for class in lineage.classes() {
            for hook in DYNAMIC_LOOKUP {
                if self.store.find_method(class, hook).await?.is_some() {
                    return Ok(Some(format!("{class} defines {hook}")));
                }
            }
        }
        Ok(None)
    }

    /// Closest member names along the chain, best first.
    async fn suggest(&self, lineage: &Lineage, member: &str) -> crate::error::Result<Vec<String>> {
        let mut names: Vec<String> = Vec::new();
        for class in lineage.classes() {
            names.extend(self.store.list_methods(class).await?.into_iter().map(|m| m.name));
            names.extend(self.store.list_attributes(class).await?.into_iter().map(|a| a.name));
        }
        names.sort();
        names.dedup();
        Ok(closest_names(
            member,
            &names,
            self.config.similarity_threshold,
            self.config.suggestion_limit,
        ))
    }
}

fn judge_call(name: &str, params: &[Param], args: Option<&CallArgs>, detail: String) -> Judgement {
    let Some(args) = args else {
        return Judgement::new(Verdict::Valid, detail);
    };
    match check_signature(params, args) {
        Ok(()) => Judgement::new(Verdict::Valid, detail),
        Err(problem) => {
            let mut judgement =
                Judgement::new(Verdict::SignatureMismatch, format!("{detail}: {problem}"));
            judgement.expected_signature = Some(format!("{name}{}", render_params(params)));
            judgement
        }
    }
}

/// Names within `threshold` similarity of `target`, most similar first.
pub fn closest_names(target: &str, candidates: &[String], threshold: f32, limit: usize) -> Vec<String> {
    let mut scored: Vec<(f32, &String)> = candidates
        .iter()
        .filter(|c| c.as_str() != target)
        .map(|c| (TextDiff::from_chars(target, c.as_str()).ratio(), c))
        .filter(|(score, _)| *score >= threshold)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored.into_iter().take(limit).map(|(_, c)| c.clone()).collect()
}
