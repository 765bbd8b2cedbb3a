//! Check Point Gaia firewalls, queried through clish

use super::prelude::*;

const ENTER_CLISH: &str = "clish";

pub struct CheckPoint<'a> {
    session: &'a mut dyn CliSession,
    parser: &'a dyn OutputParser,
}

impl<'a> CheckPoint<'a> {
    pub fn new(session: &'a mut dyn CliSession, parser: &'a dyn OutputParser) -> Self {
        Self { session, parser }
    }

    /// Route the firewall uses towards `destination`. Directly connected destinations come
    /// back as [`Signal::EightTwoHundred`].
    pub async fn route(&mut self, destination: IpAddr) -> Option<Resolution> {
        self.session.execute_command(ENTER_CLISH).await;
        let output = self
            .session
            .execute_command(&format!("show route destination {destination}"))
            .await;
        debug!("Firewall route lookup returned {} bytes", output.len());
        trace!("{output}");
        self.parser.firewall_route(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::RegexParser;
    use crate::tests::ScriptedSession;

    #[tokio::test]
    async fn test_route_enters_clish_first() {
        let parser = RegexParser::new().expect("Failed to compile patterns");
        let mut session = ScriptedSession::new().with(
            "show route destination 10.60.1.20",
            &std::fs::read_to_string("src/tests/firewall_route.txt").expect("fixture"),
        );
        let destination: IpAddr = "10.60.1.20".parse().expect("bad ip");

        let route = CheckPoint::new(&mut session, &parser)
            .route(destination)
            .await;
        assert_eq!(
            route,
            Some(Resolution::NextHop(LabelledHop::new(
                "172.16.1.254".parse().expect("bad ip"),
                None
            )))
        );
        assert_eq!(
            session.commands(),
            vec!["clish", "show route destination 10.60.1.20"]
        );
    }
}
