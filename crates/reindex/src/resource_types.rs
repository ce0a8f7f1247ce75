/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Concrete resource type catalog and base-type expansion.
//!
//! Search parameters may be declared on the abstract `Resource` and
//! `DomainResource` bases. Before any counting or partitioning the engine
//! expands those into concrete types with [`ResourceTypeCatalog::closure`].

use std::collections::BTreeSet;

pub const RESOURCE_BASE: &str = "Resource";
pub const DOMAIN_RESOURCE_BASE: &str = "DomainResource";

/// Types that derive from `Resource` but not from `DomainResource`.
const NON_DOMAIN_TYPES: &[&str] = &["Binary", "Bundle", "Parameters"];

const R4_RESOURCE_TYPES: &[&str] = &[
    "Account", "ActivityDefinition", "AdverseEvent", "AllergyIntolerance", "Appointment",
    "AppointmentResponse", "AuditEvent", "Basic", "Binary", "BiologicallyDerivedProduct",
    "BodyStructure", "Bundle", "CapabilityStatement", "CarePlan", "CareTeam", "CatalogEntry",
    "ChargeItem", "ChargeItemDefinition", "Claim", "ClaimResponse", "ClinicalImpression",
    "CodeSystem", "Communication", "CommunicationRequest", "CompartmentDefinition",
    "Composition", "ConceptMap", "Condition", "Consent", "Contract", "Coverage",
    "CoverageEligibilityRequest", "CoverageEligibilityResponse", "DetectedIssue", "Device",
    "DeviceDefinition", "DeviceMetric", "DeviceRequest", "DeviceUseStatement",
    "DiagnosticReport", "DocumentManifest", "DocumentReference", "EffectEvidenceSynthesis",
    "Encounter", "Endpoint", "EnrollmentRequest", "EnrollmentResponse", "EpisodeOfCare",
    "EventDefinition", "Evidence", "EvidenceVariable", "ExampleScenario",
    "ExplanationOfBenefit", "FamilyMemberHistory", "Flag", "Goal", "GraphDefinition", "Group",
    "GuidanceResponse", "HealthcareService", "ImagingStudy", "Immunization",
    "ImmunizationEvaluation", "ImmunizationRecommendation", "ImplementationGuide",
    "InsurancePlan", "Invoice", "Library", "Linkage", "List", "Location", "Measure",
    "MeasureReport", "Media", "Medication", "MedicationAdministration", "MedicationDispense",
    "MedicationKnowledge", "MedicationRequest", "MedicationStatement", "MedicinalProduct",
    "MessageDefinition", "MessageHeader", "MolecularSequence", "NamingSystem",
    "NutritionOrder", "Observation", "ObservationDefinition", "OperationDefinition",
    "OperationOutcome", "Organization", "OrganizationAffiliation", "Parameters", "Patient",
    "PaymentNotice", "PaymentReconciliation", "Person", "PlanDefinition", "Practitioner",
    "PractitionerRole", "Procedure", "Provenance", "Questionnaire", "QuestionnaireResponse",
    "RelatedPerson", "RequestGroup", "ResearchDefinition", "ResearchElementDefinition",
    "ResearchStudy", "ResearchSubject", "RiskAssessment", "RiskEvidenceSynthesis", "Schedule",
    "SearchParameter", "ServiceRequest", "Slot", "Specimen", "SpecimenDefinition",
    "StructureDefinition", "StructureMap", "Subscription", "Substance", "SupplyDelivery",
    "SupplyRequest", "Task", "TerminologyCapabilities", "TestReport", "TestScript", "ValueSet",
    "VerificationResult", "VisionPrescription",
];

/// The fixed set of concrete resource types a server hosts.
#[derive(Debug, Clone)]
pub struct ResourceTypeCatalog {
    types: BTreeSet<String>,
}

impl ResourceTypeCatalog {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
        }
    }

    /// The FHIR R4 concrete type list.
    pub fn r4() -> Self {
        Self::new(R4_RESOURCE_TYPES.iter().copied())
    }

    pub fn contains(&self, resource_type: &str) -> bool {
        self.types.contains(resource_type)
    }

    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(String::as_str)
    }

    /// Expands base types into the concrete types they cover. Unknown names
    /// are dropped.
    pub fn closure<'a, I>(&self, base_types: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut result = BTreeSet::new();
        for base in base_types {
            match base {
                RESOURCE_BASE => result.extend(self.types.iter().cloned()),
                DOMAIN_RESOURCE_BASE => result.extend(
                    self.types
                        .iter()
                        .filter(|t| !NON_DOMAIN_TYPES.contains(&t.as_str()))
                        .cloned(),
                ),
                concrete if self.types.contains(concrete) => {
                    result.insert(concrete.to_string());
                }
                _ => {}
            }
        }
        result
    }
}

impl Default for ResourceTypeCatalog {
    fn default() -> Self {
        Self::r4()
    }
}
