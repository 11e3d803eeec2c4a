//! Lexical path helpers. Nothing here touches the filesystem.

use std::path::Path;

use covenant_abi::AbiValue;

use crate::function::{FunctionKind, HostFunctionTable, host_functions};

fn lossy(p: Option<&std::ffi::OsStr>) -> String {
    p.map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
}

pub(super) fn register(table: &mut HostFunctionTable) {
    host_functions!(table, FunctionKind::Intrinsic, "path", {
        "join" => (Str, Str) -> Str, |a| {
            Ok(AbiValue::Str(Path::new(a.str(0)?).join(a.str(1)?).to_string_lossy().into_owned()))
        };
        "basename" => (Str) -> Str, |a| Ok(AbiValue::Str(lossy(Path::new(a.str(0)?).file_name())));
        "dirname" => (Str) -> Str, |a| {
            let parent = Path::new(a.str(0)?).parent().map(Path::as_os_str);
            Ok(AbiValue::Str(lossy(parent)))
        };
        "extension" => (Str) -> Str, |a| Ok(AbiValue::Str(lossy(Path::new(a.str(0)?).extension())));
        "stem" => (Str) -> Str, |a| Ok(AbiValue::Str(lossy(Path::new(a.str(0)?).file_stem())));
        "is_absolute" => (Str) -> Bool, |a| Ok(AbiValue::Bool(Path::new(a.str(0)?).is_absolute()));
    });
}

#[cfg(test)]
mod tests {
    use super::super::testing::{call, s};
    use covenant_abi::AbiValue;

    #[test]
    fn test_components() {
        assert_eq!(call("path.basename", &[s("/data/in/report.csv")]).unwrap(), s("report.csv"));
        assert_eq!(call("path.dirname", &[s("/data/in/report.csv")]).unwrap(), s("/data/in"));
        assert_eq!(call("path.extension", &[s("report.tar.gz")]).unwrap(), s("gz"));
        assert_eq!(call("path.stem", &[s("report.csv")]).unwrap(), s("report"));
        assert_eq!(call("path.extension", &[s("README")]).unwrap(), s(""));
    }

    #[test]
    fn test_join() {
        assert_eq!(call("path.join", &[s("data"), s("x.txt")]).unwrap(), s("data/x.txt"));
        assert_eq!(call("path.is_absolute", &[s("/x")]).unwrap(), AbiValue::Bool(true));
    }
}
