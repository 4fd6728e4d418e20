//! This module provides a client to connect to a CalDAV server

use std::convert::TryFrom;

use reqwest::Method;
use reqwest::header::CONTENT_TYPE;
use minidom::Element;
use url::Url;

use crate::error::SyncError;
use crate::resource::Resource;
use crate::settings::Settings;
use crate::utils::{find_elem, find_elems};
use crate::calendar::{CalendarInfo, SupportedComponents};
use crate::calendar::remote_calendar::RemoteCalendar;


static DAVCLIENT_BODY: &str = r#"
    <d:propfind xmlns:d="DAV:">
       <d:prop>
           <d:current-user-principal />
       </d:prop>
    </d:propfind>
"#;

static HOMESET_BODY: &str = r#"
    <d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav" >
      <d:self/>
      <d:prop>
        <c:calendar-home-set />
      </d:prop>
    </d:propfind>
"#;

static CAL_BODY: &str = r#"
    <d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav" >
       <d:prop>
         <d:displayname />
         <d:resourcetype />
         <c:supported-calendar-component-set />
       </d:prop>
    </d:propfind>
"#;

const INVALID_DAV_HINT: &str = "The server did not return a valid WebDAV answer. \
    Please check the URL: Nextcloud/ownCloud need the full DAV path, e.g. https://cloud.example.com/remote.php/dav";


/// Sends a WebDAV request and returns the parsed XML answer
pub(crate) async fn sub_request(resource: &Resource, method: &str, body: String, depth: u32) -> Result<Element, SyncError> {
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|err| SyncError::connection(format!("invalid HTTP method {}: {}", method, err)))?;

    let res = resource.http_client()?
        .request(method, resource.url().as_str())
        .header("Depth", depth)
        .header(CONTENT_TYPE, "application/xml")
        .basic_auth(resource.username(), Some(resource.password()))
        .body(body)
        .send()
        .await?;

    let status = res.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(SyncError::connection(format!("Authentication failed on {} ({})", resource.url(), status)));
    }
    if status.is_success() == false {
        return Err(SyncError::connection(format!("Unexpected HTTP status code {} from {}", status, resource.url())));
    }

    let text = res.text().await?;
    text.parse::<Element>()
        .map_err(|err| SyncError::parse(format!("{} ({})", INVALID_DAV_HINT, err)))
}

/// Sends a WebDAV request and returns every element of the answer with the given name
pub(crate) async fn sub_request_and_extract_elems(resource: &Resource, method: &str, body: String, item: &str) -> Result<Vec<Element>, SyncError> {
    let root = sub_request(resource, method, body, 1).await?;
    Ok(find_elems(&root, item)
        .iter()
        .map(|elem| (*elem).clone())
        .collect()
    )
}

async fn sub_request_and_extract_href(resource: &Resource, body: String, items: &[&str]) -> Result<String, SyncError> {
    let root = sub_request(resource, "PROPFIND", body, 0).await?;

    let mut current_element: &Element = &root;
    for item in items {
        current_element = match find_elem(current_element, item) {
            Some(elem) => elem,
            None => return Err(SyncError::parse(format!("Missing <{}> in the answer of {}. {}", item, resource.url(), INVALID_DAV_HINT))),
        };
    }

    Ok(current_element.text().trim().to_string())
}


/// A CalDAV client
pub struct Client {
    resource: Resource,

    principal: Option<Url>,
    calendar_home_set: Option<Url>,
    calendars: Option<Vec<CalendarInfo>>,
}

impl Client {
    /// Create a client. This does not start a connection
    pub fn new<S: AsRef<str>, T: ToString, U: ToString>(url: S, username: T, password: U, verify_ssl: bool) -> Result<Self, SyncError> {
        let url = Url::parse(url.as_ref())?;

        Ok(Self{
            resource: Resource::new(url, username.to_string(), password.to_string(), verify_ssl),
            principal: None,
            calendar_home_set: None,
            calendars: None,
        })
    }

    /// Create a client from the CalDAV settings.
    ///
    /// Fails before any network access if the URL or the credentials are missing
    pub fn from_settings(settings: &Settings) -> Result<Self, SyncError> {
        if settings.caldav_url.trim().is_empty() || settings.caldav_username.is_empty() || settings.caldav_password.is_empty() {
            return Err(SyncError::configuration("CalDAV connection settings are incomplete"));
        }
        Self::new(settings.caldav_full_url(), &settings.caldav_username, &settings.caldav_password, settings.caldav_verify_ssl)
    }

    pub fn url(&self) -> &Url {
        self.resource.url()
    }

    /// Return the Principal URL, or fetch it from server if not known yet
    async fn get_principal(&mut self) -> Result<Url, SyncError> {
        if let Some(p) = &self.principal {
            return Ok(p.clone());
        }

        let href = sub_request_and_extract_href(&self.resource, DAVCLIENT_BODY.into(), &["current-user-principal", "href"]).await?;
        let principal_url = self.resource.url().join(&href)?;
        self.principal = Some(principal_url.clone());
        log::debug!("Principal URL is {}", href);

        Ok(principal_url)
    }

    /// Return the Homeset URL, or fetch it from server if not known yet
    async fn get_cal_home_set(&mut self) -> Result<Url, SyncError> {
        if let Some(h) = &self.calendar_home_set {
            return Ok(h.clone());
        }
        let principal_url = self.get_principal().await?;

        let href = sub_request_and_extract_href(&self.resource.combine(principal_url.path()), HOMESET_BODY.into(), &["calendar-home-set", "href"]).await?;
        let chs_url = self.resource.url().join(&href)?;
        self.calendar_home_set = Some(chs_url.clone());
        log::debug!("Calendar home set URL is {:?}", chs_url.path());

        Ok(chs_url)
    }

    /// Return the list of calendars that can hold to-dos, or fetch from server if not known yet
    pub async fn get_calendars(&mut self) -> Result<Vec<CalendarInfo>, SyncError> {
        if let Some(c) = &self.calendars {
            return Ok(c.clone());
        }
        let cal_home_set = self.get_cal_home_set().await?;

        let root = sub_request(&self.resource.combine(cal_home_set.path()), "PROPFIND", CAL_BODY.into(), 1).await?;
        let calendars = parse_calendar_list(&root, self.resource.url());

        self.calendars = Some(calendars.clone());
        Ok(calendars)
    }

    /// Returns the names of the calendars of this server
    pub async fn list_calendars(&mut self) -> Result<Vec<String>, SyncError> {
        Ok(self.get_calendars().await?
            .into_iter()
            .map(|cal| cal.name)
            .collect())
    }

    /// Resolve the calendar to sync with.
    ///
    /// This is the calendar named `calendar_name`, or the first calendar of the server when no name is given.
    pub async fn connect(&mut self, calendar_name: Option<&str>) -> Result<RemoteCalendar, SyncError> {
        let calendars = self.get_calendars().await?;
        let first = match calendars.first() {
            None => return Err(SyncError::connection("No calendar found on the CalDAV server")),
            Some(cal) => cal,
        };

        let chosen = match calendar_name.filter(|name| name.is_empty() == false) {
            None => first,
            Some(name) => match calendars.iter().find(|cal| cal.name == name) {
                None => return Err(SyncError::connection(format!("Calendar '{}' not found", name))),
                Some(cal) => cal,
            },
        };

        log::info!("Using calendar {} ({})", chosen.name, chosen.url);
        Ok(RemoteCalendar::new(
            chosen.name.clone(),
            self.resource.combine(chosen.url.path()),
            chosen.supported_components,
        ))
    }
}

/// Tries to reach the CalDAV server configured in `settings`, and describes the result
pub async fn test_connection(settings: &Settings) -> (bool, String) {
    let mut client = match Client::from_settings(settings) {
        Err(err) => return (false, err.to_string()),
        Ok(client) => client,
    };
    match client.list_calendars().await {
        Err(err) => (false, err.to_string()),
        Ok(names) => (true, format!("Connected. Calendars: {}", names.join(", "))),
    }
}


fn parse_calendar_list(root: &Element, base_url: &Url) -> Vec<CalendarInfo> {
    let reps = find_elems(root, "response");
    let mut calendars = Vec::new();
    for rep in reps {
        let display_name = find_elem(rep, "displayname").map(|e| e.text()).unwrap_or("<no name>".to_string());
        log::debug!("Considering calendar {}", display_name);

        // We filter out non-calendar items
        let resource_types = match find_elem(rep, "resourcetype") {
            None => continue,
            Some(rt) => rt,
        };
        let mut found_calendar_type = false;
        for resource_type in resource_types.children() {
            if resource_type.name() == "calendar" {
                found_calendar_type = true;
                break;
            }
        }
        if found_calendar_type == false {
            continue;
        }

        // We filter out the root calendar collection, that has an empty supported-calendar-component-set
        let el_supported_comps = match find_elem(rep, "supported-calendar-component-set") {
            None => continue,
            Some(comps) => comps,
        };
        if el_supported_comps.children().count() == 0 {
            continue;
        }

        let calendar_href = match find_elem(rep, "href") {
            None => {
                log::warn!("Calendar {} has no URL! Ignoring it.", display_name);
                continue;
            },
            Some(h) => h.text(),
        };

        let this_calendar_url = match base_url.join(calendar_href.trim()) {
            Err(err) => {
                log::warn!("Calendar {} has an invalid URL ({})! Ignoring it.", display_name, err);
                continue;
            },
            Ok(url) => url,
        };

        let supported_components = match SupportedComponents::try_from(el_supported_comps.clone()) {
            Err(err) => {
                log::warn!("Calendar {} has invalid supported components ({})! Ignoring it.", display_name, err);
                continue;
            },
            Ok(sc) => sc,
        };
        if supported_components.contains(SupportedComponents::TODO) == false {
            log::debug!("Calendar {} does not support to-dos. Ignoring it.", display_name);
            continue;
        }

        log::info!("Found calendar {}", display_name);
        calendars.push(CalendarInfo {
            name: display_name,
            url: this_calendar_url,
            supported_components,
        });
    }
    calendars
}
