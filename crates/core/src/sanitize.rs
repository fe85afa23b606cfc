//! Masking helpers for anything that may reach a log line.

pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            let first: String = local.chars().take(1).collect();
            format!("{first}***@{domain}")
        }
        _ => "***@***.***".to_owned(),
    }
}

pub fn mask_phone(phone: &str) -> String {
    last_four(phone).map(|tail| format!("***{tail}")).unwrap_or_else(|| "******".to_owned())
}

pub fn mask_imei(imei: &str) -> String {
    last_four(imei).map(|tail| format!("***{tail}")).unwrap_or_else(|| "***".to_owned())
}

/// NIPs are never revealed, not even partially.
pub fn mask_nip(_nip: &str) -> String {
    "****".to_owned()
}

/// Keeps scheme and host, drops path and query.
pub fn mask_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return "***".to_owned();
    };
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if scheme.is_empty() || host.is_empty() {
        return "***".to_owned();
    }
    format!("{scheme}://{host}/***")
}

pub fn mask_address(district: Option<&str>) -> String {
    match district.map(str::trim).filter(|value| !value.is_empty()) {
        Some(district) => format!("***, {district}, ***"),
        None => "***".to_owned(),
    }
}

pub fn mask_card(card: &str) -> String {
    let digits: Vec<char> = card.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 4 {
        return "****-****-****-****".to_owned();
    }
    let tail: String = digits[digits.len() - 4..].iter().collect();
    format!("****-****-****-{tail}")
}

fn last_four(value: &str) -> Option<String> {
    let chars: Vec<char> = value.trim().chars().collect();
    if chars.len() < 4 {
        return None;
    }
    Some(chars[chars.len() - 4..].iter().collect())
}
