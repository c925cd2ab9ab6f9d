/// Returns `Err($error)` from the enclosing function unless `$predicate` holds.
///
/// ```ignore
/// ensure!(path.len() <= max_path_len, ParseError::too_long_uri("path", path.len(), max_path_len));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
