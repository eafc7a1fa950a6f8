// Submodules for separation of concerns
mod builder;
mod eval;
mod exec;
mod parse;
mod plan;
mod types;

pub use builder::Query;
pub use eval::{compare_bson, compare_docs, eval_filter, point_of, project, sphere_distance};
pub use exec::{apply_update, count_docs, delete_many, find_docs, find_first, DeleteReport};
pub use parse::{cast_value, parse_filter, parse_projection, parse_sort, parse_update, FieldKinds};
pub use plan::{Populate, QueryKind, QueryPlan};
pub use types::{CmpOp, Filter, FindOptions, Order, Projection, SortSpec, UpdateDoc, EARTH_RADIUS_M, MAX_LIMIT};
