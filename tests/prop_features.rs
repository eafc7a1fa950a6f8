use natours::models::Tour;
use natours::query::{parse_sort, SortSpec};
use natours::{ApiFeatures, Model, QueryString, Store};
use proptest::prelude::*;

fn paged(store: &Store, qs: &str) -> (u64, Option<u64>) {
    let features = ApiFeatures::new(Tour::find(store), QueryString::parse(qs)).paginate();
    let plan = features.query.plan();
    (plan.skip, plan.limit)
}

proptest! {
    #[test]
    fn prop_page_and_limit_set_skip(page in 1u64..50, limit in 1u64..50) {
        let store = Store::memory();
        let (skip, lim) = paged(&store, &format!("page={page}&limit={limit}"));
        prop_assert_eq!(skip, (page - 1) * limit);
        prop_assert_eq!(lim, Some(limit));
    }

    #[test]
    fn prop_non_numeric_paging_uses_defaults(page in "[a-z]{1,6}", limit in "[a-z]{1,6}") {
        let store = Store::memory();
        let (skip, lim) = paged(&store, &format!("page={page}&limit={limit}"));
        prop_assert_eq!(skip, 0);
        prop_assert_eq!(lim, Some(100));
    }

    #[test]
    fn prop_sort_keys_keep_order_and_direction(keys in prop::collection::vec(("[a-z]{1,8}", any::<bool>()), 1..=8)) {
        let spec: Vec<String> = keys.iter().map(|(f, desc)| if *desc { format!("-{f}") } else { f.clone() }).collect();
        let expected: Vec<SortSpec> =
            keys.iter().map(|(f, desc)| if *desc { SortSpec::desc(f.as_str()) } else { SortSpec::asc(f.as_str()) }).collect();
        prop_assert_eq!(parse_sort(&spec.join(",")), expected.clone());
        prop_assert_eq!(parse_sort(&spec.join(" ")), expected);
    }
}
