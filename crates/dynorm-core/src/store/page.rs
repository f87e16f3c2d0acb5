//! Page assembly shared by the in-process backends.

use std::iter::Peekable;

use super::{FilterExpression, Item, Page, Select, StoreError};

/// Evaluate rows in key order into a single page.
///
/// `limit` caps the number of rows *evaluated*, matching the service
/// semantics where the filter runs after the limit. A continuation key is
/// returned only when unevaluated rows remain.
pub(crate) fn collect_page<I>(
    rows: I,
    limit: usize,
    filter: Option<&FilterExpression>,
    select: Select,
    projection: Option<&[String]>,
) -> Result<Page, StoreError>
where
    I: Iterator<Item = Result<(String, Item), StoreError>>,
{
    let mut rows: Peekable<I> = rows.peekable();
    let mut page = Page::default();
    let mut evaluated = 0;
    let mut last_key = None;

    while evaluated < limit {
        let Some(row) = rows.next() else { break };
        let (key, item) = row?;
        evaluated += 1;

        if filter.map_or(true, |f| f.evaluate(&item)) {
            page.count += 1;
            if select == Select::AllAttributes {
                page.items.push(project(item, projection));
            }
        }
        last_key = Some(key);
    }

    if rows.peek().is_some() {
        page.last_evaluated_key = last_key;
    }
    Ok(page)
}

fn project(item: Item, projection: Option<&[String]>) -> Item {
    match projection {
        Some(attributes) => item
            .into_iter()
            .filter(|(name, _)| attributes.iter().any(|a| a == name))
            .collect(),
        None => item,
    }
}
