use std::error::Error;

use async_trait::async_trait;
use minidom::Element;
use reqwest::{header::CONTENT_TYPE, header::CONTENT_LENGTH};

use crate::calendar::{CalendarId, SupportedComponents};
use crate::resource::Resource;
use crate::traits::{RemoteTodo, TodoStore};
use crate::utils::find_elem;

/// Every VTODO, whatever its completion
static ALL_TODOS_BODY: &str = r#"
    <c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
        <d:prop>
            <d:getetag />
            <c:calendar-data />
        </d:prop>
        <c:filter>
            <c:comp-filter name="VCALENDAR">
                <c:comp-filter name="VTODO" />
            </c:comp-filter>
        </c:filter>
    </c:calendar-query>
"#;

/// Only the VTODOs that are neither completed nor cancelled
static OPEN_TODOS_BODY: &str = r#"
    <c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
        <d:prop>
            <d:getetag />
            <c:calendar-data />
        </d:prop>
        <c:filter>
            <c:comp-filter name="VCALENDAR">
                <c:comp-filter name="VTODO">
                    <c:prop-filter name="COMPLETED">
                        <c:is-not-defined/>
                    </c:prop-filter>
                    <c:prop-filter name="STATUS">
                        <c:text-match negate-condition="yes">CANCELLED</c:text-match>
                    </c:prop-filter>
                </c:comp-filter>
            </c:comp-filter>
        </c:filter>
    </c:calendar-query>
"#;


/// A CalDAV calendar created by a [`Client`](crate::client::Client).
#[derive(Debug)]
pub struct RemoteCalendar {
    name: String,
    resource: Resource,
    supported_components: SupportedComponents,
}

impl RemoteCalendar {
    pub fn new(name: String, resource: Resource, supported_components: SupportedComponents) -> Self {
        Self { name, resource, supported_components }
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn id(&self) -> &CalendarId { self.resource.url() }
    pub fn supported_components(&self) -> SupportedComponents {
        self.supported_components
    }

    async fn put(&self, url: &str, ical_text: String, precondition: Option<(&str, &str)>) -> Result<(), Box<dyn Error>> {
        let mut request = self.resource.http_client()?
            .put(url)
            .header(CONTENT_TYPE, "text/calendar; charset=utf-8")
            .header(CONTENT_LENGTH, ical_text.len())
            .basic_auth(self.resource.username(), Some(self.resource.password()));
        if let Some((header, value)) = precondition {
            request = request.header(header, value);
        }

        let response = request.body(ical_text).send().await?;
        if response.status().is_success() == false {
            return Err(format!("Unexpected HTTP status code {:?} for {}", response.status(), url).into());
        }
        Ok(())
    }
}

#[async_trait]
impl TodoStore for RemoteCalendar {
    async fn list_all_todos(&self, include_completed: bool) -> Result<Vec<RemoteTodo>, Box<dyn Error>> {
        let body = if include_completed { ALL_TODOS_BODY } else { OPEN_TODOS_BODY };
        let responses = crate::client::sub_request_and_extract_elems(&self.resource, "REPORT", body.to_string(), "response").await?;
        Ok(parse_todo_responses(&responses, &self.resource))
    }

    async fn save_new(&mut self, ical: String) -> Result<(), Box<dyn Error>> {
        let uid = match crate::ical::parse(&ical)?.into_iter().next() {
            None => return Err("Refusing to save an iCal file that contains no VTODO".into()),
            Some(todo) => todo.uid().to_string(),
        };
        let file_name = format!("{}.ics", sanitize_filename::sanitize(&uid));
        let url = self.resource.url().join(&file_name)?;

        log::debug!("Creating {}", url);
        self.put(url.as_str(), ical, Some(("If-None-Match", "*"))).await
    }

    async fn update(&mut self, item: &RemoteTodo, ical: String) -> Result<(), Box<dyn Error>> {
        log::debug!("Updating {}", item.href);
        let precondition = item.etag.as_deref().map(|etag| ("If-Match", etag));
        self.put(&item.href, ical, precondition).await
    }
}

fn parse_todo_responses(responses: &[Element], resource: &Resource) -> Vec<RemoteTodo> {
    let mut items = Vec::new();
    for response in responses {
        let href = match find_elem(response, "href") {
            None => {
                log::warn!("Unable to extract HREF");
                continue;
            },
            Some(elem) => elem.text(),
        };
        let href = resource.combine(href.trim()).url().to_string();

        let data = match find_elem(response, "calendar-data") {
            None => {
                log::warn!("No calendar data for item {}, ignoring it", href);
                continue;
            },
            Some(elem) => elem.text(),
        };
        let etag = find_elem(response, "getetag")
            .map(|elem| elem.text())
            .filter(|etag| etag.is_empty() == false);

        items.push(RemoteTodo { href, etag, data });
    }
    items
}


#[cfg(test)]
mod tests {
    use super::*;

    const REPORT_ANSWER: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:cal="urn:ietf:params:xml:ns:caldav">
  <d:response>
    <d:href>/dav/calendars/john/household/abc-123.ics</d:href>
    <d:propstat><d:prop>
      <d:getetag>"e1"</d:getetag>
      <cal:calendar-data>BEGIN:VCALENDAR
VERSION:2.0
BEGIN:VTODO
UID:abc-123
SUMMARY:Water plants
STATUS:COMPLETED
END:VTODO
END:VCALENDAR
</cal:calendar-data>
    </d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/calendars/john/household/broken.ics</d:href>
    <d:propstat><d:prop><d:getetag>"e2"</d:getetag></d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;

    #[test]
    fn report_answers_are_turned_into_items() {
        let root: Element = REPORT_ANSWER.parse().unwrap();
        let responses: Vec<Element> = crate::utils::find_elems(&root, "response").into_iter().cloned().collect();
        let resource = Resource::new("https://cloud.example.com/dav/calendars/john/household/".parse().unwrap(),
                                     "john".to_string(), "secret".to_string(), true);

        let items = parse_todo_responses(&responses, &resource);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].href, "https://cloud.example.com/dav/calendars/john/household/abc-123.ics");
        assert_eq!(items[0].etag.as_deref(), Some("\"e1\""));

        let todos = crate::ical::parse(&items[0].data).unwrap();
        assert_eq!(todos[0].uid(), "abc-123");
        assert!(todos[0].status().is_completed());
    }
}
