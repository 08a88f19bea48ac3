use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::query::period::Period;

/// Additive numeric fields on a fact row. Only these are ever summed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Impressions,
    Visits,
    Spend,
    Leads,
    NewLeads,
    ReturningLeads,
    TotalAppointments,
    NewAppointments,
    ReturningAppointments,
    TotalConversations,
    TotalEstimatedRevenue,
    EstimatedLtv6m,
}

impl Field {
    pub const ALL: [Field; 12] = [
        Field::Impressions,
        Field::Visits,
        Field::Spend,
        Field::Leads,
        Field::NewLeads,
        Field::ReturningLeads,
        Field::TotalAppointments,
        Field::NewAppointments,
        Field::ReturningAppointments,
        Field::TotalConversations,
        Field::TotalEstimatedRevenue,
        Field::EstimatedLtv6m,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Impressions => "impressions",
            Field::Visits => "visits",
            Field::Spend => "spend",
            Field::Leads => "leads",
            Field::NewLeads => "new_leads",
            Field::ReturningLeads => "returning_leads",
            Field::TotalAppointments => "total_appointments",
            Field::NewAppointments => "new_appointments",
            Field::ReturningAppointments => "returning_appointments",
            Field::TotalConversations => "total_conversations",
            Field::TotalEstimatedRevenue => "total_estimated_revenue",
            Field::EstimatedLtv6m => "estimated_ltv_6m",
        }
    }

    /// Column heading used in tables and CSV exports.
    pub fn label(&self) -> &'static str {
        match self {
            Field::Impressions => "Impressions",
            Field::Visits => "Visits",
            Field::Spend => "Spend",
            Field::Leads => "Leads",
            Field::NewLeads => "New Leads",
            Field::ReturningLeads => "Returning Leads",
            Field::TotalAppointments => "Appointments",
            Field::NewAppointments => "New Appointments",
            Field::ReturningAppointments => "Returning Appointments",
            Field::TotalConversations => "Conversations",
            Field::TotalEstimatedRevenue => "Est. Revenue",
            Field::EstimatedLtv6m => "Est. LTV (6m)",
        }
    }

    pub fn is_currency(&self) -> bool {
        matches!(
            self,
            Field::Spend | Field::TotalEstimatedRevenue | Field::EstimatedLtv6m
        )
    }

    /// Fields where a smaller number is the better outcome.
    pub fn lower_is_better(&self) -> bool {
        matches!(self, Field::Spend)
    }
}

impl FromStr for Field {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Field::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| Error::FieldParse(s.to_string()))
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation for one clinic, one period, one traffic source.
///
/// `total_roas` and `total_conversion` arrive pre-computed from the ETL job.
/// They are kept for display and data-quality checks only; aggregates always
/// re-derive ratios from summed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRecord {
    pub entity_id: String,
    pub period: Period,
    pub channel: Option<String>,
    pub impressions: Option<f64>,
    pub visits: Option<f64>,
    pub spend: Option<f64>,
    pub leads: Option<f64>,
    pub new_leads: Option<f64>,
    pub returning_leads: Option<f64>,
    pub total_appointments: Option<f64>,
    pub new_appointments: Option<f64>,
    pub returning_appointments: Option<f64>,
    pub total_conversations: Option<f64>,
    pub total_estimated_revenue: Option<f64>,
    pub estimated_ltv_6m: Option<f64>,
    pub total_roas: Option<f64>,
    pub total_conversion: Option<f64>,
}

impl FactRecord {
    pub fn new(entity_id: impl Into<String>, period: Period, channel: Option<&str>) -> Self {
        Self {
            entity_id: entity_id.into(),
            period,
            channel: channel.map(str::to_string),
            impressions: None,
            visits: None,
            spend: None,
            leads: None,
            new_leads: None,
            returning_leads: None,
            total_appointments: None,
            new_appointments: None,
            returning_appointments: None,
            total_conversations: None,
            total_estimated_revenue: None,
            estimated_ltv_6m: None,
            total_roas: None,
            total_conversion: None,
        }
    }

    /// Raw value of an additive field, as stored.
    pub fn value(&self, field: Field) -> Option<f64> {
        match field {
            Field::Impressions => self.impressions,
            Field::Visits => self.visits,
            Field::Spend => self.spend,
            Field::Leads => self.leads,
            Field::NewLeads => self.new_leads,
            Field::ReturningLeads => self.returning_leads,
            Field::TotalAppointments => self.total_appointments,
            Field::NewAppointments => self.new_appointments,
            Field::ReturningAppointments => self.returning_appointments,
            Field::TotalConversations => self.total_conversations,
            Field::TotalEstimatedRevenue => self.total_estimated_revenue,
            Field::EstimatedLtv6m => self.estimated_ltv_6m,
        }
    }

    pub fn set(&mut self, field: Field, value: Option<f64>) {
        let slot = match field {
            Field::Impressions => &mut self.impressions,
            Field::Visits => &mut self.visits,
            Field::Spend => &mut self.spend,
            Field::Leads => &mut self.leads,
            Field::NewLeads => &mut self.new_leads,
            Field::ReturningLeads => &mut self.returning_leads,
            Field::TotalAppointments => &mut self.total_appointments,
            Field::NewAppointments => &mut self.new_appointments,
            Field::ReturningAppointments => &mut self.returning_appointments,
            Field::TotalConversations => &mut self.total_conversations,
            Field::TotalEstimatedRevenue => &mut self.total_estimated_revenue,
            Field::EstimatedLtv6m => &mut self.estimated_ltv_6m,
        };
        *slot = value;
    }

    /// Builder-style setter, handy for fixtures and the ingest mapper.
    pub fn with(mut self, field: Field, value: f64) -> Self {
        self.set(field, Some(value));
        self
    }

    /// Value used when summing: absent and `NaN` count as zero.
    pub fn additive_value(&self, field: Field) -> f64 {
        match self.value(field) {
            Some(v) if v.is_finite() => v,
            _ => 0.0,
        }
    }
}

/// Traffic source as a grouping key. `Unsegmented` (no channel on the row)
/// and `Named("")` are different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelKey {
    Unsegmented,
    Named(String),
}

impl ChannelKey {
    pub fn of(record: &FactRecord) -> Self {
        match &record.channel {
            Some(name) => ChannelKey::Named(name.clone()),
            None => ChannelKey::Unsegmented,
        }
    }

    /// Inverse of [`ChannelKey::label`] for user input. `unsegmented` and
    /// `(unsegmented)` select rows without a channel.
    pub fn from_label(s: &str) -> Self {
        match s.trim() {
            "unsegmented" | "(unsegmented)" => ChannelKey::Unsegmented,
            name => ChannelKey::Named(name.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            ChannelKey::Unsegmented => "(unsegmented)",
            ChannelKey::Named(name) => name,
        }
    }
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A clinic in the display-name directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub entity_id: String,
    pub display_name: String,
    pub is_active: bool,
}
