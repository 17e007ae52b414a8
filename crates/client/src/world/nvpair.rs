//! Name-value attribute lists. The wire form is newline-separated lines of
//! `NAME TYPE CLASS SENDTO VALUE`, where the value is the rest of the line.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameValue {
    pub name: String,
    pub value_type: String,
    pub class: String,
    pub sendto: String,
    pub value: String,
}

pub fn parse(text: &str) -> Vec<NameValue> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut parts = line.splitn(5, ' ');
            let name = parts.next()?.to_owned();
            let value_type = parts.next()?.to_owned();
            let class = parts.next()?.to_owned();
            let sendto = parts.next()?.to_owned();
            let value = parts.next().unwrap_or("").to_owned();
            Some(NameValue {
                name,
                value_type,
                class,
                sendto,
                value,
            })
        })
        .collect()
}

pub fn find<'a>(list: &'a [NameValue], name: &str) -> Option<&'a str> {
    list.iter()
        .find(|nv| nv.name == name)
        .map(|nv| nv.value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_avatar_names() {
        let list = parse(
            "FirstName STRING RW SV Jane\nLastName STRING RW SV Doe\nTitle STRING RW SV Grand Vizier",
        );
        assert_eq!(list.len(), 3);
        assert_eq!(find(&list, "FirstName"), Some("Jane"));
        assert_eq!(find(&list, "LastName"), Some("Doe"));
        // values keep embedded spaces
        assert_eq!(find(&list, "Title"), Some("Grand Vizier"));
    }

    #[test]
    fn short_lines_are_skipped() {
        let list = parse("Broken STRING\n\nAttachItemID STRING RW SV 1234");
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "AttachItemID");
    }
}
