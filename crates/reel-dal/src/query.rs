//! Composable listing queries.
//!
//! A [`QueryBuilder`] turns request parameters ([`QueryParams`]) into a
//! [`QuerySpec`] for one [`Entity`]. Stages can be chained in any order,
//! each consumes the builder and returns a new one. Nothing touches the
//! database until a repository executes the resulting spec.

use std::{collections::BTreeMap, marker::PhantomData, sync::Arc};

use serde::{Deserialize, Serialize, ser::SerializeMap as _};
use tracing::debug;

use crate::{ChosenDB, Error, ListingParams, MAX_LIMIT, Order, error::Result};

pub const SEARCH_TERM_KEY: &str = "searchTerm";
const SEARCH_TERM_ALIAS: &str = "search_term";
pub const SORT_KEY: &str = "sort";
pub const PAGE_KEY: &str = "page";
pub const LIMIT_KEY: &str = "limit";
pub const FIELDS_KEY: &str = "fields";

/// Keys controlling the query itself, never used as filter conditions.
pub const RESERVED_KEYS: &[&str] = &[
    SEARCH_TERM_KEY,
    SEARCH_TERM_ALIAS,
    SORT_KEY,
    PAGE_KEY,
    LIMIT_KEY,
    FIELDS_KEY,
];

const ID_FIELD: &str = "id";
const MAX_NAME_LEN: usize = 100;
const MAX_SEARCH_TERM_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryDefaults {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: MAX_LIMIT as u32,
        }
    }
}

/// Relation stored in a link table, e.g. movie -> genres.
#[derive(Debug)]
pub struct Link {
    pub field: &'static str,
    pub table: &'static str,
    pub owner_key: &'static str,
    pub target_key: &'static str,
}

/// Column type, decides how filter values are parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Int,
    Text,
}

pub trait Entity {
    const TABLE: &'static str;
    /// Scalar columns, usable for search, filtering, ordering and selection.
    const FIELDS: &'static [&'static str];
    /// Kinds of non-text fields, any field not listed here is text.
    const FIELD_KINDS: &'static [(&'static str, FieldKind)] = &[];
    /// Bookkeeping fields left out unless explicitly selected.
    const HIDDEN_FIELDS: &'static [&'static str];
    const DEFAULT_SORT: &'static str;
    const LINKS: &'static [Link] = &[];

    fn link(field: &str) -> Option<&'static Link> {
        Self::LINKS.iter().find(|l| l.field == field)
    }

    fn field_kind(field: &str) -> FieldKind {
        if field == ID_FIELD || Self::link(field).is_some() {
            return FieldKind::Int;
        }
        Self::FIELD_KINDS
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, kind)| *kind)
            .unwrap_or(FieldKind::Text)
    }
}

/// Request parameters of a listing.
///
/// Reserved keys are parsed into typed fields, everything else is kept
/// as a filter entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>")]
pub struct QueryParams {
    pub search_term: Option<String>,
    pub sort: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub fields: Option<String>,
    filters: BTreeMap<String, String>,
}

fn parse_number(key: &str, value: &str) -> Result<u32> {
    value
        .trim()
        .parse()
        .map_err(|e| Error::InvalidQuery(format!("Invalid {key} value {value:?}: {e}")))
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut params = QueryParams::default();
        for (key, value) in pairs {
            let key: String = key.into();
            let value: String = value.into();
            match key.as_str() {
                SEARCH_TERM_KEY | SEARCH_TERM_ALIAS => params.search_term = Some(value),
                SORT_KEY => params.sort = Some(value),
                PAGE_KEY => params.page = Some(parse_number(PAGE_KEY, &value)?),
                LIMIT_KEY => params.limit = Some(parse_number(LIMIT_KEY, &value)?),
                FIELDS_KEY => params.fields = Some(value),
                _ => {
                    params.filters.insert(key, value);
                }
            }
        }
        Ok(params)
    }

    pub fn with_search_term(mut self, term: impl Into<String>) -> Self {
        self.search_term = Some(term.into());
        self
    }

    pub fn with_sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_fields(mut self, fields: impl Into<String>) -> Self {
        self.fields = Some(fields.into());
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn filter_value(&self, key: &str) -> Option<&str> {
        self.filters.get(key).map(String::as_str)
    }

    pub fn filters(&self) -> impl Iterator<Item = (&str, &str)> {
        self.filters.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl TryFrom<BTreeMap<String, String>> for QueryParams {
    type Error = Error;

    fn try_from(value: BTreeMap<String, String>) -> Result<Self> {
        QueryParams::from_pairs(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl FilterValue {
    /// Text values are taken as given, other kinds must parse.
    pub fn parse(kind: FieldKind, value: &str) -> Result<Self> {
        let invalid = || Error::InvalidQuery(format!("Invalid {kind:?} filter value {value:?}"));
        match kind {
            FieldKind::Bool => match value.trim() {
                "true" | "1" => Ok(FilterValue::Bool(true)),
                "false" | "0" => Ok(FilterValue::Bool(false)),
                _ => Err(invalid()),
            },
            FieldKind::Int => value
                .trim()
                .parse::<i64>()
                .map(FilterValue::Int)
                .map_err(|_| invalid()),
            FieldKind::Text => Ok(FilterValue::Text(value.to_string())),
        }
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Int(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// At least one of the fields contains the term, ignoring Unicode case.
    Contains { fields: Vec<String>, term: String },
    Equals { field: String, value: FilterValue },
    /// Empty `values` matches nothing.
    In { field: String, values: Vec<i64> },
}

impl Condition {
    pub fn equals(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Condition::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn one_of(field: impl Into<String>, values: Vec<i64>) -> Self {
        Condition::In {
            field: field.into(),
            values,
        }
    }

    fn fields(&self) -> Vec<&str> {
        match self {
            Condition::Contains { fields, .. } => fields.iter().map(String::as_str).collect(),
            Condition::Equals { field, .. } | Condition::In { field, .. } => vec![field.as_str()],
        }
    }

    fn push_sql<E: Entity>(&self, qb: &mut sqlx::QueryBuilder<'_, ChosenDB>) {
        match self {
            Condition::Contains { fields, term } => {
                let pattern = contains_pattern(term);
                qb.push("(");
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        qb.push(" OR ");
                    }
                    qb.push(format_args!("{field} REGEXP "))
                        .push_bind(pattern.clone());
                }
                qb.push(")");
            }
            Condition::Equals { field, value } => {
                match E::link(field) {
                    Some(link) => {
                        qb.push(format_args!(
                            "{ID_FIELD} IN (SELECT {} FROM {} WHERE {} = ",
                            link.owner_key, link.table, link.target_key
                        ));
                        push_value(qb, value);
                        qb.push(")");
                    }
                    None => {
                        qb.push(format_args!("{field} = "));
                        push_value(qb, value);
                    }
                };
            }
            Condition::In { field, values } => {
                if values.is_empty() {
                    qb.push("1 = 0");
                    return;
                }
                match E::link(field) {
                    Some(link) => {
                        qb.push(format_args!(
                            "{ID_FIELD} IN (SELECT {} FROM {} WHERE {} IN (",
                            link.owner_key, link.table, link.target_key
                        ));
                        push_id_list(qb, values);
                        qb.push(")");
                    }
                    None => {
                        qb.push(format_args!("{field} IN ("));
                        push_id_list(qb, values);
                    }
                }
            }
        }
    }
}

fn push_value(qb: &mut sqlx::QueryBuilder<'_, ChosenDB>, value: &FilterValue) {
    match value {
        FilterValue::Bool(v) => qb.push_bind(*v),
        FilterValue::Int(v) => qb.push_bind(*v),
        FilterValue::Text(v) => qb.push_bind(v.clone()),
    };
}

fn push_id_list(qb: &mut sqlx::QueryBuilder<'_, ChosenDB>, values: &[i64]) {
    let mut list = qb.separated(", ");
    for value in values {
        list.push_bind(*value);
    }
    list.push_unseparated(")");
}

/// Case-insensitive regex matching `term` literally.
fn contains_pattern(term: &str) -> String {
    format!("(?i){}", regex::escape(term))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum Selection {
    #[default]
    Default,
    Only(Vec<String>),
    Except(Vec<String>),
}

impl Selection {
    fn parse(fields: &str) -> Result<Self> {
        let (excluded, included): (Vec<_>, Vec<_>) = fields
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .partition(|f| f.starts_with('-'));
        match (included.is_empty(), excluded.is_empty()) {
            (true, true) => Ok(Selection::Default),
            (false, true) => Ok(Selection::Only(
                included.into_iter().map(str::to_string).collect(),
            )),
            (true, false) => Ok(Selection::Except(
                excluded.into_iter().map(|f| f[1..].to_string()).collect(),
            )),
            (false, false) => Err(Error::InvalidQuery(
                "Cannot mix included and excluded fields".to_string(),
            )),
        }
    }

    fn names(&self) -> &[String] {
        match self {
            Selection::Default => &[],
            Selection::Only(names) | Selection::Except(names) => names,
        }
    }
}

/// Resolved field visibility for serialized records.
#[derive(Debug, PartialEq, Eq)]
pub enum Projection {
    Include(Vec<String>),
    Exclude(Vec<String>),
}

impl Projection {
    pub fn shows(&self, field: &str) -> bool {
        match self {
            Projection::Include(fields) => field == ID_FIELD || fields.iter().any(|f| f == field),
            Projection::Exclude(fields) => !fields.iter().any(|f| f == field),
        }
    }
}

/// Record which serializes only the selected fields.
#[derive(Debug, Clone)]
pub struct Projected<T> {
    record: T,
    projection: Arc<Projection>,
}

impl<T> Projected<T> {
    pub fn new(record: T, projection: Arc<Projection>) -> Self {
        Self { record, projection }
    }

}

impl<T> std::ops::Deref for Projected<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.record
    }
}

impl<T: Serialize> Serialize for Projected<T> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::Error as _;
        match serde_json::to_value(&self.record).map_err(S::Error::custom)? {
            serde_json::Value::Object(map) => {
                let mut out = serializer.serialize_map(None)?;
                for (key, value) in map.iter().filter(|(k, _)| self.projection.shows(k)) {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
            other => other.serialize(serializer),
        }
    }
}

/// Executable description of a listing for entity `E`.
#[derive(Debug, Clone)]
pub struct QuerySpec<E> {
    conditions: Vec<Condition>,
    listing: ListingParams,
    selection: Selection,
    entity: PhantomData<E>,
}

impl<E: Entity> QuerySpec<E> {
    /// Adds a refinement to an already built spec.
    pub fn and(mut self, condition: Condition) -> Result<Self> {
        validate_fields::<E>(&condition.fields(), Error::InvalidFilterField)?;
        self.conditions.push(condition);
        Ok(self)
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn listing(&self) -> &ListingParams {
        &self.listing
    }

    pub fn projection(&self) -> Arc<Projection> {
        let projection = match &self.selection {
            Selection::Default => {
                Projection::Exclude(E::HIDDEN_FIELDS.iter().map(|f| f.to_string()).collect())
            }
            Selection::Only(fields) => Projection::Include(fields.clone()),
            Selection::Except(fields) => Projection::Exclude(
                fields
                    .iter()
                    .cloned()
                    .chain(E::HIDDEN_FIELDS.iter().map(|f| f.to_string()))
                    .collect(),
            ),
        };
        Arc::new(projection)
    }

    pub(crate) fn push_where(&self, qb: &mut sqlx::QueryBuilder<'_, ChosenDB>) {
        for (i, condition) in self.conditions.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            condition.push_sql::<E>(qb);
        }
    }
}

fn is_known_field<E: Entity>(field: &str) -> bool {
    field == ID_FIELD || E::FIELDS.contains(&field) || E::link(field).is_some()
}

fn validate_fields<E: Entity>(fields: &[&str], err: fn(String) -> Error) -> Result<()> {
    match fields.iter().find(|f| !is_known_field::<E>(f)) {
        Some(field) => Err(err(field.to_string())),
        None => Ok(()),
    }
}

fn parse_ordering(orderings: &str) -> Result<Vec<Order>> {
    orderings
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            if name.len() > MAX_NAME_LEN {
                return Err(Error::InvalidQuery("Ordering name too long".to_string()));
            }
            let order = match name {
                name if name.starts_with('-') => Order::Desc(name[1..].to_string()),
                name if name.starts_with('+') => Order::Asc(name[1..].to_string()),
                name => Order::Asc(name.to_string()),
            };
            Ok(order)
        })
        .collect()
}

/// Builds a [`QuerySpec`] stage by stage.
///
/// ```ignore
/// let spec = QueryBuilder::<Movie>::new(params, &defaults)
///     .search(&["title", "description"])
///     .filter(&["genre"])
///     .paginate()
///     .sort()
///     .fields()
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct QueryBuilder<E> {
    params: QueryParams,
    defaults: QueryDefaults,
    spec: QuerySpec<E>,
    error: Option<String>,
}

impl<E: Entity> QueryBuilder<E> {
    pub fn new(params: QueryParams, defaults: &QueryDefaults) -> Self {
        Self {
            params,
            defaults: *defaults,
            spec: QuerySpec {
                conditions: vec![],
                listing: ListingParams::new(0, defaults.max_limit.into()),
                selection: Selection::Default,
                entity: PhantomData,
            },
            error: None,
        }
    }

    pub fn search(mut self, fields: &[&str]) -> Self {
        let term = self
            .params
            .search_term
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        if let Some(term) = term {
            if term.len() > MAX_SEARCH_TERM_LEN {
                self.error
                    .get_or_insert_with(|| "Search term too long".to_string());
                return self;
            }
            debug!("Searching {term:?} in {fields:?}");
            self.spec.conditions.push(Condition::Contains {
                fields: fields.iter().map(|f| f.to_string()).collect(),
                term: term.to_string(),
            });
        }
        self
    }

    pub fn filter(mut self, excluded: &[&str]) -> Self {
        let conditions = self
            .params
            .filters()
            .filter(|(key, _)| !RESERVED_KEYS.contains(key) && !excluded.contains(key))
            .map(|(key, value)| {
                FilterValue::parse(E::field_kind(key), value).map(|v| Condition::equals(key, v))
            })
            .collect::<Result<Vec<_>>>();
        match conditions {
            Ok(conditions) => self.spec.conditions.extend(conditions),
            Err(e) => {
                self.error.get_or_insert_with(|| e.to_string());
            }
        }
        self
    }

    pub fn paginate(mut self) -> Self {
        let page = self.params.page.unwrap_or(1).max(1);
        let limit = self
            .params
            .limit
            .unwrap_or(self.defaults.default_limit)
            .clamp(1, self.defaults.max_limit.max(1));
        self.spec.listing.offset = (i64::from(page) - 1) * i64::from(limit);
        self.spec.listing.limit = limit.into();
        self
    }

    pub fn sort(mut self) -> Self {
        let sort = self.params.sort.as_deref().unwrap_or(E::DEFAULT_SORT);
        match parse_ordering(sort) {
            Ok(order) if order.is_empty() => {
                self.spec.listing.order = parse_ordering(E::DEFAULT_SORT).ok();
            }
            Ok(order) => self.spec.listing.order = Some(order),
            Err(e) => {
                self.error.get_or_insert_with(|| e.to_string());
            }
        }
        self
    }

    pub fn fields(mut self) -> Self {
        if let Some(fields) = self.params.fields.as_deref() {
            match Selection::parse(fields) {
                Ok(selection) => self.spec.selection = selection,
                Err(e) => {
                    self.error.get_or_insert_with(|| e.to_string());
                }
            }
        }
        self
    }

    /// Finishes the chain, checking every referenced field exists on `E`.
    pub fn build(self) -> Result<QuerySpec<E>> {
        if let Some(error) = self.error {
            return Err(Error::InvalidQuery(error));
        }
        let spec = self.spec;
        for condition in &spec.conditions {
            validate_fields::<E>(&condition.fields(), Error::InvalidFilterField)?;
        }
        let selected: Vec<&str> = spec.selection.names().iter().map(String::as_str).collect();
        validate_fields::<E>(&selected, Error::InvalidSelectField)?;
        spec.listing.ordering(&sortable_fields::<E>())?;
        Ok(spec)
    }
}

pub(crate) fn sortable_fields<E: Entity>() -> Vec<&'static str> {
    std::iter::once(ID_FIELD)
        .chain(E::FIELDS.iter().copied())
        .collect()
}
