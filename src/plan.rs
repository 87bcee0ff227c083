// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of Parity.

// Parity is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Parity is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Parity.  If not, see <http://www.gnu.org/licenses/>.

// Query planning: pick the index whose directory tree serves the query
// best, verify the requested sort is producible along that tree, and split
// filters and sort directives into bound (absorbed by the traversal) and
// free (applied per packet).

use crate::{
	bookmark::Bookmark,
	error::{Error, Result},
	filter::PathFilter,
	index::IndexDef,
	schema::{Record, Schema},
	value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	Asc,
	Desc,
}

impl std::fmt::Display for Direction {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Direction::Asc => write!(f, "asc"),
			Direction::Desc => write!(f, "desc"),
		}
	}
}

/// What the index selection optimizes for when filters and sorts disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPriority {
	Filtering,
	Sorting,
}

pub(crate) type FlexFilter<R> = Box<dyn Fn(&R) -> bool + Send + Sync>;

/// Raw plan inputs, assembled by `Query`.
pub(crate) struct QueryInput<R: Record> {
	pub path_filters: Vec<(usize, PathFilter)>,
	pub flex_filters: Vec<FlexFilter<R>>,
	pub sorting: Vec<(usize, Direction)>,
	pub limit: u64,
	pub bookmark: Option<Bookmark>,
	pub hinted_index: Option<String>,
	pub priority: IndexPriority,
}

impl<R: Record> QueryInput<R> {
	pub fn new() -> QueryInput<R> {
		QueryInput {
			path_filters: Vec::new(),
			flex_filters: Vec::new(),
			sorting: Vec::new(),
			limit: 0,
			bookmark: None,
			hinted_index: None,
			priority: IndexPriority::Filtering,
		}
	}

	fn is_strict(&self, column: usize) -> bool {
		self.path_filters.iter().any(|(c, f)| *c == column && f.is_strict())
	}
}

/// One directory level of the chosen index's traversal.
#[derive(Clone)]
pub(crate) struct LevelPlan {
	pub column: usize,
	/// Single accepted value; the level is traversed without a directory
	/// read.
	pub strict: Option<(Value, String)>,
	/// Non-strict bound filter, applied to directory entries.
	pub filter: Option<PathFilter>,
	pub direction: Direction,
}

pub(crate) struct Plan {
	pub schema: &'static Schema,
	pub index: &'static IndexDef,
	pub levels: Vec<LevelPlan>,
	pub free_path: Vec<(usize, PathFilter)>,
	pub bound_sort: Vec<(usize, Direction)>,
	pub free_sort: Vec<(usize, Direction)>,
	pub limit: u64,
}

impl Plan {
	pub fn build<R: Record>(input: &QueryInput<R>) -> Result<Plan> {
		let schema = R::schema();
		for (column, _) in &input.path_filters {
			if *column >= schema.columns.len() {
				return Err(Error::Schema(format!(
					"table {} filter on unknown column {}",
					schema.table, column
				)));
			}
		}
		for (column, _) in &input.sorting {
			if *column >= schema.columns.len() {
				return Err(Error::Schema(format!(
					"table {} sort on unknown column {}",
					schema.table, column
				)));
			}
		}

		let index = choose_index(schema, input)?;
		let bound_sort = check_sort(schema, index, input)?;

		let mut levels = Vec::with_capacity(index.columns.len());
		let mut bound = bound_sort.iter();
		let mut next_bound = bound.next();
		for &column in index.columns {
			let filter = input.path_filters.iter().find(|(c, _)| *c == column).map(|(_, f)| f);
			let strict = filter
				.and_then(|f| f.strict_value())
				.map(|v| (v.clone(), schema.to_string(column, v)));
			let direction = match next_bound {
				Some((c, direction)) if *c == column && strict.is_none() => {
					next_bound = bound.next();
					*direction
				}
				_ => Direction::Asc,
			};
			levels.push(LevelPlan {
				column,
				filter: if strict.is_none() { filter.cloned() } else { None },
				strict,
				direction,
			});
		}

		let free_path: Vec<(usize, PathFilter)> = input
			.path_filters
			.iter()
			.filter(|(c, _)| !index.contains(*c))
			.map(|(c, f)| (*c, f.clone()))
			.collect();
		let free_sort: Vec<(usize, Direction)> =
			input.sorting.iter().filter(|(c, _)| !index.contains(*c)).copied().collect();

		log::debug!(
			target: "packet-db",
			"Planned query on table {} using {}: {} bound levels, {} free filters, {} free sorts",
			schema.table,
			index,
			levels.len(),
			free_path.len(),
			free_sort.len(),
		);
		Ok(Plan { schema, index, levels, free_path, bound_sort, free_sort, limit: input.limit })
	}

	/// Textual plan, for hosts that want to inspect the query instead of
	/// running it.
	pub fn describe(&self) -> String {
		let mut out = format!("table {} via {}", self.schema.table, self.index);
		for level in &self.levels {
			let name = self.schema.columns[level.column].name;
			match (&level.strict, &level.filter) {
				(Some((_, text)), _) => out.push_str(&format!("\n  level {} = {:?}", name, text)),
				(None, Some(filter)) => {
					out.push_str(&format!("\n  level {} {} ({})", name, level.direction, filter))
				}
				(None, None) => out.push_str(&format!("\n  level {} {}", name, level.direction)),
			}
		}
		for (column, filter) in &self.free_path {
			out.push_str(&format!(
				"\n  free filter {} ({})",
				self.schema.columns[*column].name, filter
			));
		}
		for (column, direction) in &self.free_sort {
			out.push_str(&format!(
				"\n  free sort {} {}",
				self.schema.columns[*column].name, direction
			));
		}
		if self.limit > 0 {
			out.push_str(&format!("\n  limit {}", self.limit));
		}
		out
	}
}

fn choose_index<R: Record>(
	schema: &'static Schema,
	input: &QueryInput<R>,
) -> Result<&'static IndexDef> {
	if let Some(name) = &input.hinted_index {
		return schema.index_named(name).ok_or_else(|| {
			Error::Schema(format!("table {} has no index named {}", schema.table, name))
		});
	}
	let indexes: &'static [IndexDef] = schema.indexes;
	let mut best = &indexes[0];
	for candidate in &indexes[1..] {
		if beats(candidate, best, input) {
			best = candidate;
		}
	}
	Ok(best)
}

// Level-by-level comparison. `challenger` is declared later than `holder`
// and takes over only on a strict win; running out of levels keeps the
// earlier declaration.
fn beats<R: Record>(
	challenger: &IndexDef,
	holder: &IndexDef,
	input: &QueryInput<R>,
) -> bool {
	let mut challenger_sort = 0usize;
	let mut holder_sort = 0usize;
	let depth = challenger.columns.len().max(holder.columns.len());
	for level in 0..depth {
		let a = challenger.columns.get(level).copied();
		let b = holder.columns.get(level).copied();
		let strict_a = a.map_or(false, |c| input.is_strict(c));
		let strict_b = b.map_or(false, |c| input.is_strict(c));
		let sort_a = !strict_a
			&& a.is_some()
			&& input.sorting.get(challenger_sort).map(|(c, _)| *c) == a;
		let sort_b = !strict_b
			&& b.is_some()
			&& input.sorting.get(holder_sort).map(|(c, _)| *c) == b;

		if a != b {
			let (first_a, first_b, second_a, second_b) = match input.priority {
				IndexPriority::Filtering => (strict_a, strict_b, sort_a, sort_b),
				IndexPriority::Sorting => (sort_a, sort_b, strict_a, strict_b),
			};
			if first_a != first_b {
				return first_a;
			}
			if second_a != second_b {
				return second_a;
			}
		}
		if sort_a {
			challenger_sort += 1;
		}
		if sort_b {
			holder_sort += 1;
		}
	}
	false
}

// Walk the index columns in order, consuming sort directives. A strictly
// filtered column absorbs a same-column directive vacuously; a non-strict
// column consumes the next directive only while no earlier column was
// skipped. Anything else that still names an index column, or directives
// left over a skipped column, cannot be produced by this tree.
fn check_sort<R: Record>(
	schema: &'static Schema,
	index: &'static IndexDef,
	input: &QueryInput<R>,
) -> Result<Vec<(usize, Direction)>> {
	let sorting = &input.sorting;
	let mut cursor = 0usize;
	let mut skipped = false;
	let mut bound = Vec::new();
	for &column in index.columns {
		let strict = input.is_strict(column);
		if cursor < sorting.len() && sorting[cursor].0 == column && (strict || !skipped) {
			if !strict {
				bound.push(sorting[cursor]);
			}
			cursor += 1;
			continue;
		}
		if strict {
			continue;
		}
		if sorting[cursor..].iter().any(|(c, _)| *c == column) {
			return Err(infeasible(schema, sorting));
		}
		skipped = true;
	}
	if cursor < sorting.len() && skipped {
		return Err(infeasible(schema, sorting));
	}
	Ok(bound)
}

fn infeasible(schema: &Schema, sorting: &[(usize, Direction)]) -> Error {
	let requested = sorting
		.iter()
		.map(|(c, d)| format!("{} {}", schema.columns[*c].name, d))
		.collect();
	let admissible = schema
		.indexes
		.iter()
		.map(|index| {
			index.columns.iter().map(|c| schema.columns[*c].name.to_string()).collect()
		})
		.collect();
	Error::InfeasibleSort { requested, admissible }
}

#[cfg(test)]
mod test {
	use super::{Direction, IndexPriority, Plan, QueryInput};
	use crate::error::Error;
	use crate::filter::PathFilter;
	use crate::schema::fixture::{Metric, ACCOUNT, DATE, IMPRESSIONS};
	use crate::value::Value;

	fn text(s: &str) -> Value {
		Value::Text(s.to_string())
	}

	#[test]
	fn strict_filters_tie_to_declaration_order() {
		let mut input = QueryInput::<Metric>::new();
		input.path_filters.push((DATE, PathFilter::exact(text("2020-01-02"))));
		input.path_filters.push((ACCOUNT, PathFilter::exact(text("a11"))));
		let plan = Plan::build(&input).unwrap();
		assert_eq!(plan.index.name, "account_date");
		assert!(plan.levels.iter().all(|l| l.strict.is_some()));
		assert!(plan.free_path.is_empty());
	}

	#[test]
	fn sort_drives_selection() {
		let mut input = QueryInput::<Metric>::new();
		input.sorting = vec![(ACCOUNT, Direction::Asc), (DATE, Direction::Asc)];
		let plan = Plan::build(&input).unwrap();
		assert_eq!(plan.index.name, "account_date");
		assert_eq!(plan.bound_sort, vec![(ACCOUNT, Direction::Asc), (DATE, Direction::Asc)]);
		assert!(plan.free_sort.is_empty());

		let mut input = QueryInput::<Metric>::new();
		input.sorting = vec![(DATE, Direction::Asc), (ACCOUNT, Direction::Asc)];
		let plan = Plan::build(&input).unwrap();
		assert_eq!(plan.index.name, "date_account");
	}

	#[test]
	fn priority_breaks_filter_sort_conflict() {
		// Strict filter on date favors date_account; sort on account favors
		// account_date.
		let mut input = QueryInput::<Metric>::new();
		input.path_filters.push((DATE, PathFilter::exact(text("2020-01-02"))));
		input.sorting = vec![(ACCOUNT, Direction::Asc)];
		let plan = Plan::build(&input).unwrap();
		assert_eq!(plan.index.name, "date_account");

		let mut input = QueryInput::<Metric>::new();
		input.path_filters.push((DATE, PathFilter::exact(text("2020-01-02"))));
		input.sorting = vec![(ACCOUNT, Direction::Asc)];
		input.priority = IndexPriority::Sorting;
		let plan = Plan::build(&input).unwrap();
		assert_eq!(plan.index.name, "account_date");
	}

	#[test]
	fn hint_overrides_selection() {
		let mut input = QueryInput::<Metric>::new();
		input.path_filters.push((ACCOUNT, PathFilter::exact(text("a11"))));
		input.hinted_index = Some("date_account".to_string());
		let plan = Plan::build(&input).unwrap();
		assert_eq!(plan.index.name, "date_account");

		let mut input = QueryInput::<Metric>::new();
		input.hinted_index = Some("nope".to_string());
		assert!(matches!(Plan::build(&input), Err(Error::Schema(_))));
	}

	#[test]
	fn unsortable_free_directive_is_infeasible() {
		let mut input = QueryInput::<Metric>::new();
		input.sorting = vec![(ACCOUNT, Direction::Asc), (IMPRESSIONS, Direction::Desc)];
		match Plan::build(&input) {
			Err(Error::InfeasibleSort { requested, admissible }) => {
				assert_eq!(requested, vec!["account asc", "impressions desc"]);
				assert!(admissible.contains(&vec!["account".to_string(), "date".to_string()]));
				assert!(admissible.contains(&vec!["date".to_string(), "account".to_string()]));
			}
			other => panic!("expected infeasible sort, got {:?}", other.map(|p| p.index.name)),
		}
	}

	#[test]
	fn out_of_order_index_column_is_infeasible() {
		// date then account exists as an index, but under account_date the
		// hint forces the wrong order.
		let mut input = QueryInput::<Metric>::new();
		input.sorting = vec![(DATE, Direction::Asc), (ACCOUNT, Direction::Asc)];
		input.hinted_index = Some("account_date".to_string());
		assert!(matches!(Plan::build(&input), Err(Error::InfeasibleSort { .. })));
	}

	#[test]
	fn strict_prefix_makes_deep_sort_feasible() {
		let mut input = QueryInput::<Metric>::new();
		input.path_filters.push((ACCOUNT, PathFilter::exact(text("a11"))));
		input.sorting = vec![(DATE, Direction::Desc)];
		let plan = Plan::build(&input).unwrap();
		assert_eq!(plan.index.name, "account_date");
		assert_eq!(plan.bound_sort, vec![(DATE, Direction::Desc)]);
		assert_eq!(plan.levels[1].direction, Direction::Desc);
	}

	#[test]
	fn fully_pinned_packet_allows_free_sort() {
		let mut input = QueryInput::<Metric>::new();
		input.path_filters.push((ACCOUNT, PathFilter::exact(text("a11"))));
		input.path_filters.push((DATE, PathFilter::exact(text("2020-01-02"))));
		input.sorting = vec![(IMPRESSIONS, Direction::Desc)];
		let plan = Plan::build(&input).unwrap();
		assert_eq!(plan.free_sort, vec![(IMPRESSIONS, Direction::Desc)]);
	}

	#[test]
	fn partitions_free_filters() {
		let mut input = QueryInput::<Metric>::new();
		input.path_filters.push((ACCOUNT, PathFilter::exact(text("a11"))));
		input.path_filters.push((DATE, PathFilter::at_least(text("2020-01-01"))));
		input.path_filters.push((IMPRESSIONS, PathFilter::at_least(Value::Int(10))));
		let plan = Plan::build(&input).unwrap();
		assert_eq!(plan.index.name, "account_date");
		assert_eq!(plan.free_path.len(), 1);
		assert_eq!(plan.free_path[0].0, IMPRESSIONS);
		// The date range is bound to its level, not re-applied per packet.
		assert!(plan.levels[1].filter.is_some());
		assert!(plan.levels[1].strict.is_none());
	}

	#[test]
	fn describe_names_the_plan() {
		let mut input = QueryInput::<Metric>::new();
		input.path_filters.push((ACCOUNT, PathFilter::exact(text("a11"))));
		input.sorting = vec![(DATE, Direction::Asc)];
		input.limit = 5;
		let plan = Plan::build(&input).unwrap();
		let description = plan.describe();
		assert!(description.contains("account_date"));
		assert!(description.contains("limit 5"));
	}
}
