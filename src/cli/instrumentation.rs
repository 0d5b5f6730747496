use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, filter::Directive, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Diagnostic logging on stderr.
#[derive(clap::Args, Debug, Clone, Default)]
pub(crate) struct Instrumentation {
    /// Enable debug logs, -vv for trace
    #[clap(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub(crate) verbose: u8,

    /// Tracing directives, e.g. `exo::api=trace`
    #[clap(long = "log-directives", global = true, env = "EXOSCALE_LOG", value_delimiter = ',', num_args = 0..)]
    pub(crate) log_directives: Vec<Directive>,
}

impl Instrumentation {
    fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    }

    fn filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::new(format!("warn,exo={}", self.log_level()));
        for directive in &self.log_directives {
            filter = filter.add_directive(directive.clone());
        }
        filter
    }

    pub(crate) fn setup(&self) -> color_eyre::Result<()> {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .without_time()
            .compact();

        tracing_subscriber::registry()
            .with(self.filter())
            .with(fmt_layer)
            .with(ErrorLayer::default())
            .try_init()?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::Instrumentation;

    #[test]
    fn verbosity_raises_the_crate_level() {
        let quiet = Instrumentation::default();
        assert_eq!(quiet.log_level(), "warn");

        let chatty = Instrumentation {
            verbose: 2,
            log_directives: vec!["exo::api=debug".parse().unwrap()],
        };
        assert_eq!(chatty.log_level(), "trace");
        assert!(chatty.filter().to_string().contains("exo::api=debug"));
    }
}
