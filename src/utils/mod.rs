///! Some utility functions

use minidom::Element;

use crate::mapper::SyncEntry;

/// Walks an XML tree and returns every element that has the given name
pub fn find_elems<S: AsRef<str>>(root: &Element, searched_name: S) -> Vec<&Element> {
    let searched_name = searched_name.as_ref();
    let mut elems: Vec<&Element> = Vec::new();

    for el in root.children() {
        if el.name() == searched_name {
            elems.push(el);
        } else {
            let ret = find_elems(el, searched_name);
            elems.extend(ret);
        }
    }
    elems
}

/// Walks an XML tree until it finds an elements with the given name
pub fn find_elem<S: AsRef<str>>(root: &Element, searched_name: S) -> Option<&Element> {
    let searched_name = searched_name.as_ref();
    if root.name() == searched_name {
        return Some(root);
    }

    for el in root.children() {
        if el.name() == searched_name {
            return Some(el);
        } else {
            let ret = find_elem(el, searched_name);
            if ret.is_some() {
                return ret;
            }
        }
    }
    None
}

/// A debug utility that pretty-prints the entries of a sync map
pub fn print_sync_entries(entries: &[&SyncEntry]) {
    for entry in entries {
        let completion = if entry.last_status == "COMPLETED" { "✓" } else { " " };
        let sentinel = if entry.is_sentinel() { "x" } else { "=" };
        println!("    {}{} {} {}\t{}\t{}\t({}, {})",
            completion, sentinel,
            entry.entity_kind, entry.entity_id,
            entry.last_summary.as_deref().unwrap_or(""),
            entry.external_uid,
            entry.sync_direction,
            entry.last_synced.format("%Y-%m-%d %H:%M:%S"),
        );
    }
}
