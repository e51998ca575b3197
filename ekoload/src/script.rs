//! YAML scenario scripts and their conversion into engine types.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context as _;
use ekoload_core::flow::DEFAULT_LOOP_VALUE;
use ekoload_core::{
    Arrivals, CallSpec, Collection, LoopBound, LoopSpec, Phase, ScenarioConfig, StepSpec,
    ThinkDefaults, ThinkSpec, TokenSource, TransportOptions, Vars,
};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ScriptDoc {
    pub config: ConfigYaml,

    #[serde(default)]
    pub flow: Vec<StepYaml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConfigYaml {
    pub target: Option<String>,
    pub version: Option<String>,

    /// Token endpoint.
    pub target_token: Option<String>,
    /// Static token.
    pub token: Option<String>,

    #[serde(default)]
    pub reuse_connection: bool,

    #[serde(default)]
    pub tls: TlsYaml,

    #[serde(default)]
    pub transport: TransportYaml,

    #[serde(default)]
    pub phases: Vec<PhaseYaml>,

    #[serde(default)]
    pub defaults: DefaultsYaml,

    #[serde(default)]
    pub variables: Vars,

    /// Processor names the flow expects to be registered.
    #[serde(default)]
    pub processor: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TlsYaml {
    pub reject_unauthorized: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransportYaml {
    pub connect_timeout: Option<YamlDuration>,
    pub auth_timeout: Option<YamlDuration>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PhaseYaml {
    pub duration: YamlDuration,
    pub arrival_count: Option<u64>,
    pub arrival_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct DefaultsYaml {
    #[serde(default)]
    pub think: ThinkDefaultsYaml,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ThinkDefaultsYaml {
    /// Percent.
    pub jitter: Option<f64>,
}

/// One flow entry. Exactly one of `send`/`function`, `think` or `loop` shapes it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StepYaml {
    pub send: Option<SendYaml>,
    pub function: Option<String>,

    pub think: Option<ThinkYaml>,

    #[serde(rename = "loop")]
    pub loop_steps: Option<Vec<StepYaml>>,
    pub count: Option<u64>,
    pub loop_value: Option<String>,
    pub over: Option<OverYaml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct SendYaml {
    pub rpc: Option<String>,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThinkYaml {
    Seconds(f64),
    Template(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum OverYaml {
    Items(Vec<Value>),
    Var(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    pub(crate) fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|v| YamlDuration(Duration::from_secs(v)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Duration::try_from_secs_f64(v)
                    .map(YamlDuration)
                    .map_err(|e| E::custom(format!("duration {v} is not usable ({e})")))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                crate::cli::parse_duration(v)
                    .map(YamlDuration)
                    .map_err(E::custom)
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// Values from the command line or environment. `None` leaves the script value in place.
#[derive(Debug, Clone, Default)]
pub(crate) struct Overrides {
    pub target: Option<String>,
    pub token_url: Option<String>,
    pub token: Option<String>,
    pub duration: Option<Duration>,
    pub arrivals: Option<u64>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub reuse_connection: bool,
}

pub(crate) fn parse(text: &str) -> anyhow::Result<ScriptDoc> {
    serde_yaml::from_str(text).context("invalid scenario script")
}

impl ScriptDoc {
    pub(crate) fn scenario_config(&self, overrides: &Overrides) -> anyhow::Result<ScenarioConfig> {
        let cfg = &self.config;

        let target = overrides
            .target
            .clone()
            .or_else(|| cfg.target.clone())
            .filter(|t| !t.is_empty())
            .context("no target: set `config.target`, TARGET_URL or --target")?;

        let token = match (&overrides.token, &overrides.token_url) {
            (Some(token), _) => TokenSource::Static(token.clone()),
            (None, Some(url)) => TokenSource::Endpoint(url.clone()),
            (None, None) => match (&cfg.token, &cfg.target_token) {
                (Some(token), _) => TokenSource::Static(token.clone()),
                (None, Some(url)) => TokenSource::Endpoint(url.clone()),
                (None, None) => anyhow::bail!(
                    "no token source: set `config.targetToken` or `config.token` (or TARGET_TOKEN_URL / TARGET_TOKEN)"
                ),
            },
        };

        let mut config = ScenarioConfig::new(target, token);
        if let Some(version) = cfg.version.clone().filter(|v| !v.is_empty()) {
            config.version = version;
        }
        config.reuse_connection = cfg.reuse_connection || overrides.reuse_connection;
        config.think = ThinkDefaults {
            jitter: cfg.defaults.think.jitter,
        };
        config.transport = TransportOptions {
            headers: cfg
                .transport
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            connect_timeout: cfg.transport.connect_timeout.map(YamlDuration::into_inner),
            auth_timeout: cfg.transport.auth_timeout.map(YamlDuration::into_inner),
            reject_unauthorized: cfg.tls.reject_unauthorized.unwrap_or(true),
        };

        config.variables = cfg.variables.clone();
        for (name, value) in [("username", &overrides.username), ("password", &overrides.password)]
        {
            if let Some(value) = value {
                config
                    .variables
                    .insert(name.to_string(), Value::String(value.clone()));
            }
        }

        Ok(config)
    }

    /// Arrival phases. A script without phases runs a single session.
    pub(crate) fn phases(&self, overrides: &Overrides) -> anyhow::Result<Vec<Phase>> {
        let mut phases = self
            .config
            .phases
            .iter()
            .enumerate()
            .map(|(i, p)| phase(p).with_context(|| format!("config.phases[{i}]")))
            .collect::<anyhow::Result<Vec<_>>>()?;

        if phases.is_empty() {
            phases.push(Phase {
                duration: Duration::ZERO,
                arrivals: Arrivals::Count(1),
            });
        }

        if let Some(first) = phases.first_mut() {
            if let Some(duration) = overrides.duration {
                first.duration = duration;
            }
            if let Some(count) = overrides.arrivals {
                first.arrivals = Arrivals::Count(count);
            }
        }

        Ok(phases)
    }

    pub(crate) fn flow(&self) -> anyhow::Result<Vec<StepSpec>> {
        steps(&self.flow, "flow")
    }
}

fn phase(p: &PhaseYaml) -> anyhow::Result<Phase> {
    let arrivals = match (p.arrival_count, p.arrival_rate) {
        (Some(count), None) => Arrivals::Count(count),
        (None, Some(rate)) if rate.is_finite() && rate >= 0.0 => Arrivals::Rate(rate),
        (None, Some(rate)) => anyhow::bail!("arrivalRate must be a non-negative number, got {rate}"),
        (Some(_), Some(_)) => anyhow::bail!("set either arrivalCount or arrivalRate, not both"),
        (None, None) => anyhow::bail!("missing arrivalCount or arrivalRate"),
    };
    Ok(Phase {
        duration: p.duration.into_inner(),
        arrivals,
    })
}

fn steps(items: &[StepYaml], path: &str) -> anyhow::Result<Vec<StepSpec>> {
    items
        .iter()
        .enumerate()
        .map(|(i, s)| step(s, &format!("{path}[{i}]")))
        .collect()
}

fn step(s: &StepYaml, path: &str) -> anyhow::Result<StepSpec> {
    let call = s.send.is_some() || s.function.is_some();
    let shapes = [s.loop_steps.is_some(), s.think.is_some(), call];
    if shapes.iter().filter(|&&set| set).count() > 1 {
        anyhow::bail!("{path}: a step is one of `send`, `think` or `loop`, not several");
    }
    if s.loop_steps.is_none() && (s.count.is_some() || s.over.is_some() || s.loop_value.is_some()) {
        anyhow::bail!("{path}: `count`, `over` and `loopValue` belong to a `loop` step");
    }

    if let Some(body) = &s.loop_steps {
        let bound = match (&s.over, s.count) {
            (Some(_), Some(_)) => anyhow::bail!("{path}: a loop takes `count` or `over`, not both"),
            (Some(OverYaml::Items(items)), None) => {
                LoopBound::OverCollection(Collection::Items(items.clone()))
            }
            (Some(OverYaml::Var(name)), None) => {
                LoopBound::OverCollection(Collection::Var(name.clone()))
            }
            (None, Some(count)) => LoopBound::Fixed(count),
            (None, None) => LoopBound::Unbounded,
        };
        return Ok(StepSpec::Loop(LoopSpec {
            bound,
            loop_value: s
                .loop_value
                .clone()
                .unwrap_or_else(|| DEFAULT_LOOP_VALUE.to_string()),
            body: steps(body, &format!("{path}.loop"))?,
        }));
    }

    if let Some(think) = &s.think {
        return Ok(StepSpec::Think(match think {
            ThinkYaml::Seconds(secs) => ThinkSpec::Seconds(*secs),
            ThinkYaml::Template(raw) => match raw.trim().parse::<f64>() {
                Ok(secs) => ThinkSpec::Seconds(secs),
                Err(_) => ThinkSpec::Template(raw.clone()),
            },
        }));
    }

    if !call {
        anyhow::bail!("{path}: step needs `send`, `think` or `loop`");
    }

    let send = s.send.clone().unwrap_or_default();
    Ok(StepSpec::Call(CallSpec {
        rpc: send.rpc,
        params: send.params,
        processor: s.function.clone(),
    }))
}
