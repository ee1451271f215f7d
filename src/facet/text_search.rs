use std::cell::OnceCell;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, error};

use super::{state_mismatch, Facet, FacetConfig, FacetContext, FacetState};
use crate::error::Result;
use crate::expression::{self, Expression};
use crate::set::{KeyHasher, Set};
use crate::settings::Settings;

/// Holds back the latest input until `delay` has passed without a newer one.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Option<(String, Instant)>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, pending: None }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Replaces whatever is pending; the deadline restarts from `now`.
    pub fn schedule(&mut self, input: &str, now: Instant) {
        self.pending = Some((input.to_string(), now + self.delay));
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Hands out the pending input once its deadline is reached.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        match &self.pending {
            Some((_, deadline)) if *deadline <= now => self.pending.take().map(|(input, _)| input),
            _ => None,
        }
    }
}

#[derive(Debug)]
enum Searched {
    AllProperties,
    Expressions(Vec<Expression>),
}

/// Keeps items where any searched value contains the query, ignoring case.
#[derive(Debug)]
pub struct TextSearchFacet {
    id: String,
    label: String,
    searched: Option<Searched>,
    requires_enter: bool,
    text: Option<String>,
    debouncer: Debouncer,
    texts: OnceCell<HashMap<String, Vec<String>, KeyHasher>>,
}

// Stored form of a query: trimmed, blank means none.
fn query(text: Option<&str>) -> Option<String> {
    text.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string)
}

impl TextSearchFacet {
    /// With no expressions every property of an item is searched.
    pub fn new(id: &str, expressions: Vec<Expression>, delay: Duration) -> Self {
        let searched = if expressions.is_empty() { Searched::AllProperties } else { Searched::Expressions(expressions) };
        Self {
            id: id.to_string(),
            label: id.to_string(),
            searched: Some(searched),
            requires_enter: false,
            text: None,
            debouncer: Debouncer::new(delay),
            texts: OnceCell::new(),
        }
    }

    pub fn from_config(id: &str, config: &FacetConfig, settings: &Settings) -> Self {
        let delay = Duration::from_millis(settings.text_search_delay_ms);
        let mut facet = match config.expression.as_deref() {
            None => Self::new(id, Vec::new(), delay),
            Some(source) => match expression::parse_several(source) {
                Ok(expressions) => Self::new(id, expressions, delay),
                Err(e) => {
                    error!(facet = %id, expression = %source, error = %e, "malformed text search expressions");
                    let mut facet = Self::new(id, Vec::new(), delay);
                    facet.searched = None;
                    facet
                }
            },
        };
        facet.label = config.facet_label.clone().unwrap_or_else(|| id.to_string());
        facet.requires_enter = config.requires_enter.unwrap_or(false);
        facet
    }

    pub fn label(&self) -> &str {
        &self.label
    }
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
    pub fn requires_enter(&self) -> bool {
        self.requires_enter
    }
    pub fn set_requires_enter(&mut self, requires_enter: bool) {
        self.requires_enter = requires_enter;
    }
    pub fn is_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    /// Sets the query right away. Blank text clears it.
    pub fn set_text(&mut self, text: &str) -> bool {
        let text = query(Some(text));
        let changed = text != self.text;
        self.text = text;
        changed
    }

    /// A keystroke. Enter applies at once and so does clearing the box;
    /// other input waits for the debouncer unless Enter is required, in
    /// which case it is dropped. Reports whether the query changed now.
    pub fn input(&mut self, text: &str, now: Instant, enter: bool) -> bool {
        if enter || text.trim().is_empty() {
            self.debouncer.cancel();
            return self.set_text(text);
        }
        if !self.requires_enter {
            self.debouncer.schedule(text, now);
        }
        false
    }

    /// Applies debounced input that has come due.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.debouncer.poll(now) {
            Some(text) => {
                debug!(facet = %self.id, %text, "text search fired");
                self.set_text(&text)
            }
            None => false,
        }
    }

    fn texts(&self, ctx: &FacetContext) -> Result<Option<&HashMap<String, Vec<String>, KeyHasher>>> {
        let Some(searched) = &self.searched else {
            return Ok(None);
        };
        if let Some(texts) = self.texts.get() {
            return Ok(Some(texts));
        }
        let mut texts: HashMap<String, Vec<String>, KeyHasher> = HashMap::default();
        for item in ctx.all_items.iter() {
            let mut values = Vec::new();
            match searched {
                Searched::AllProperties => {
                    for property in ctx.database.get_all_properties() {
                        values.extend(ctx.database.get_object_list(item, property).iter().map(|v| v.to_lowercase()));
                    }
                }
                Searched::Expressions(expressions) => {
                    for expression in expressions {
                        values.extend(expression.evaluate_on_item(item, ctx.database)?.iter().map(str::to_lowercase));
                    }
                }
            }
            texts.insert(item.to_string(), values);
        }
        Ok(Some(self.texts.get_or_init(|| texts)))
    }
}

impl Facet for TextSearchFacet {
    fn id(&self) -> &str {
        &self.id
    }

    fn has_restrictions(&self) -> bool {
        self.text.is_some()
    }

    fn restrict(&self, ctx: &FacetContext, items: &Set) -> Result<Set> {
        let Some(text) = &self.text else {
            return Ok(items.clone());
        };
        let Some(texts) = self.texts(ctx)? else {
            return Ok(items.clone());
        };
        let query = text.to_lowercase();
        let mut set = Set::new();
        for item in items.iter() {
            if texts.get(item).is_some_and(|values| values.iter().any(|value| value.contains(&query))) {
                set.add(item);
            }
        }
        Ok(set)
    }

    fn update(&mut self, _ctx: &FacetContext, _items: &Set) -> Result<()> {
        Ok(())
    }

    fn clear_all_restrictions(&mut self) -> FacetState {
        let state = self.export_state();
        self.debouncer.cancel();
        self.text = None;
        state
    }

    fn apply_restrictions(&mut self, state: &FacetState) -> Result<()> {
        match state {
            FacetState::TextSearch { text } => {
                self.set_text(text.as_deref().unwrap_or(""));
                Ok(())
            }
            other => Err(state_mismatch(&self.id, other)),
        }
    }

    fn export_state(&self) -> FacetState {
        FacetState::TextSearch { text: self.text.clone() }
    }

    fn export_empty_state(&self) -> FacetState {
        FacetState::TextSearch { text: None }
    }

    fn state_differs(&self, state: &FacetState) -> bool {
        match state {
            FacetState::TextSearch { text } => query(text.as_deref()) != self.text,
            _ => true,
        }
    }

    fn on_root_items_changed(&mut self) {
        self.texts.take();
    }
}
