/// Recursively deep-merge `overlay` into `base`.
///
/// - Tables merge recursively per-field.
/// - Scalars and arrays from the overlay **replace** the base value.
pub fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                if let Some(base_val) = base_table.get_mut(key) {
                    deep_merge(base_val, overlay_val);
                } else {
                    base_table.insert(key.clone(), overlay_val.clone());
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
        },
    }
}

/// Set a dotted `path` (e.g. `logging.level`) inside `root`, creating
/// intermediate tables as needed.
pub fn set_path(root: &mut toml::Value, path: &str, value: toml::Value) {
    let mut overlay = value;
    for key in path.rsplit('.') {
        let mut table = toml::map::Map::new();
        table.insert(key.to_owned(), overlay);
        overlay = toml::Value::Table(table);
    }
    deep_merge(root, &overlay);
}
