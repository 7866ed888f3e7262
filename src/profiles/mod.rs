use std::fmt;

use oauth2::url::Url;

use crate::model::{BusinessInfo, Profile, Visibility};

pub const DISPLAY_NAME_MIN: usize = 2;
pub const DISPLAY_NAME_MAX: usize = 50;
pub const BIO_MAX: usize = 500;
pub const BUSINESS_NAME_MAX: usize = 200;
pub const SLOGAN_MAX: usize = 200;
pub const DESCRIPTION_MAX: usize = 500;
pub const LOCATION_MAX: usize = 200;
pub const CONTACT_NUMBER_MAX: usize = 50;

/// Unvalidated profile as typed into the edit form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileDraft {
    pub display_name: String,
    pub bio: String,
    pub social_links: Vec<String>,
    pub visibility: Visibility,
    pub business: BusinessInfo,
}

impl ProfileDraft {
    pub fn from_profile(profile: &Profile) -> Self {
        Self {
            display_name: profile.display_name.clone(),
            bio: profile.bio.clone(),
            social_links: profile.social_links.clone(),
            visibility: profile.visibility,
            business: profile.business.clone(),
        }
    }

    /// Trims every field and checks it against its limits. Private profiles
    /// come out with every business field blank.
    pub fn validate(&self) -> Result<Profile, ProfileErrors> {
        let mut errors = ProfileErrors::default();

        let display_name = self.display_name.trim();
        let len = display_name.chars().count();
        if len == 0 {
            errors.display_name = Some("Display name is required".to_owned());
        } else if len < DISPLAY_NAME_MIN {
            errors.display_name = Some(format!("Display name must be at least {DISPLAY_NAME_MIN} characters"));
        } else if len > DISPLAY_NAME_MAX {
            errors.display_name = Some(format!("Display name must be at most {DISPLAY_NAME_MAX} characters"));
        }

        let bio = self.bio.trim();
        if bio.chars().count() > BIO_MAX {
            errors.bio = Some(format!("Bio must be at most {BIO_MAX} characters"));
        }

        let mut social_links = Vec::new();
        for (index, link) in self.social_links.iter().enumerate() {
            let link = link.trim();
            if link.is_empty() {
                continue;
            }
            match check_link(link) {
                Ok(()) => social_links.push(link.to_owned()),
                Err(reason) => errors.social_links.push((index, reason)),
            }
        }

        let business = match self.visibility {
            Visibility::Private => BusinessInfo::default(),
            Visibility::Public => {
                let BusinessInfo { business_name, slogan, description, location, contact_number } = &self.business;
                BusinessInfo {
                    business_name: bounded(&mut errors, "Business name", business_name, BUSINESS_NAME_MAX),
                    slogan: bounded(&mut errors, "Slogan", slogan, SLOGAN_MAX),
                    description: bounded(&mut errors, "Description", description, DESCRIPTION_MAX),
                    location: bounded(&mut errors, "Location", location, LOCATION_MAX),
                    contact_number: bounded(&mut errors, "Contact number", contact_number, CONTACT_NUMBER_MAX),
                }
            }
        };

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Profile {
            display_name: display_name.to_owned(),
            bio: bio.to_owned(),
            social_links,
            visibility: self.visibility,
            business,
        })
    }
}

fn check_link(link: &str) -> Result<(), String> {
    let url = Url::parse(link).map_err(|_| "Invalid URL format".to_owned())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err("Link must start with http:// or https://".to_owned());
    }
    if !url.has_host() {
        return Err("Invalid URL format".to_owned());
    }
    Ok(())
}

fn bounded(errors: &mut ProfileErrors, field: &'static str, value: &str, max: usize) -> String {
    let value = value.trim();
    if value.chars().count() > max {
        errors.business.push((field, format!("{field} must be at most {max} characters")));
    }
    value.to_owned()
}

/// Every problem found in a draft, by field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileErrors {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    /// Index into the draft's links, with the reason.
    pub social_links: Vec<(usize, String)>,
    pub business: Vec<(&'static str, String)>,
}

impl ProfileErrors {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.bio.is_none()
            && self.social_links.is_empty()
            && self.business.is_empty()
    }
}

impl fmt::Display for ProfileErrors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reasons: Vec<String> = Vec::new();
        reasons.extend(self.display_name.iter().cloned());
        reasons.extend(self.bio.iter().cloned());
        reasons.extend(self.social_links.iter().map(|(index, reason)| format!("link {}: {reason}", index + 1)));
        reasons.extend(self.business.iter().map(|(_, reason)| reason.clone()));
        f.write_str(&reasons.join("; "))
    }
}

impl std::error::Error for ProfileErrors {}
